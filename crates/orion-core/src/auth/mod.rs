// Auth Broker — per-provider credential state: OAuth token records on
// disk for "openai"/"gemini", environment variables for API-key
// providers, a reachability probe for the local provider.

mod oauth;

pub use oauth::{login, OAuthError};

use crate::config::Config;
use crate::error::EngineResult;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

const OAUTH_PROVIDERS: [&str; 2] = ["openai", "gemini"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Oauth,
    ApiKey,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub available: bool,
    pub auth_type: AuthType,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OAuthRecord {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
    provider: String,
}

pub struct AuthBroker {
    auth_dir: PathBuf,
    local_base_url: String,
    http: reqwest::Client,
}

impl AuthBroker {
    pub fn new(config: &Config) -> Self {
        Self { auth_dir: config.auth_dir(), local_base_url: config.local_provider_base_url.clone(), http: reqwest::Client::new() }
    }

    fn record_path(&self, provider: &str) -> PathBuf {
        self.auth_dir.join(format!("{provider}.json"))
    }

    fn env_var_for(provider: &str) -> Option<&'static str> {
        match provider {
            "anthropic" => Some("ANTHROPIC_API_KEY"),
            "openai" => Some("OPENAI_API_KEY"),
            "gemini" => Some("GEMINI_API_KEY"),
            "openrouter" => Some("OPENROUTER_API_KEY"),
            "groq" => Some("GROQ_API_KEY"),
            "mistral" => Some("MISTRAL_API_KEY"),
            _ => None,
        }
    }

    fn read_record(&self, provider: &str) -> Option<OAuthRecord> {
        let content = std::fs::read_to_string(self.record_path(provider)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_record(&self, record: &OAuthRecord) -> EngineResult<()> {
        std::fs::create_dir_all(&self.auth_dir)?;
        std::fs::write(self.record_path(&record.provider), serde_json::to_string_pretty(record)?)?;
        Ok(())
    }

    /// Ready-to-use credential string, or `None` if the provider has no
    /// usable credential right now.
    pub async fn get_token(&self, provider: &str) -> EngineResult<Option<String>> {
        if provider == "local" || provider == "ollama" {
            return Ok(Some("local".to_string()));
        }

        if OAUTH_PROVIDERS.contains(&provider) {
            if let Some(record) = self.read_record(provider) {
                if record.expires_at - Utc::now() > Duration::hours(1) {
                    return Ok(Some(format!("Bearer {}", record.access_token)));
                }
                return Ok(self.refresh(provider, &record).await.ok().flatten());
            }
        }

        Ok(Self::env_var_for(provider)
            .and_then(|name| std::env::var(name).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn refresh(&self, provider: &str, record: &OAuthRecord) -> EngineResult<Option<String>> {
        let endpoint = match provider {
            "openai" => "https://auth.openai.com/oauth/token",
            "gemini" => "https://oauth2.googleapis.com/token",
            _ => return Ok(None),
        };

        let client_id = oauth::client_id_for(provider);
        let resp = self
            .http
            .post(endpoint)
            .form(&[("grant_type", "refresh_token"), ("refresh_token", &record.refresh_token), ("client_id", &client_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!("[auth] refresh for {provider} failed with status {}", resp.status());
            return Ok(None);
        }

        let body: serde_json::Value = resp.json().await?;
        let Some(access_token) = body["access_token"].as_str() else { return Ok(None) };
        let expires_in = body["expires_in"].as_i64().unwrap_or(3600);
        let new_record = OAuthRecord {
            access_token: access_token.to_string(),
            refresh_token: body["refresh_token"].as_str().unwrap_or(&record.refresh_token).to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in),
            provider: provider.to_string(),
        };
        self.write_record(&new_record)?;
        info!("[auth] refreshed token for {provider}");
        Ok(Some(format!("Bearer {access_token}")))
    }

    pub fn persist_oauth(&self, provider: &str, access_token: &str, refresh_token: &str, expires_in_seconds: i64) -> EngineResult<()> {
        self.write_record(&OAuthRecord {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.to_string(),
            expires_at: Utc::now() + Duration::seconds(expires_in_seconds),
            provider: provider.to_string(),
        })
    }

    pub fn logout(&self, provider: &str) -> EngineResult<()> {
        let path = self.record_path(provider);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    async fn local_reachable(&self) -> bool {
        let url = format!("{}/", self.local_base_url.trim_end_matches('/'));
        match self.http.get(&url).timeout(std::time::Duration::from_secs(2)).send().await {
            Ok(resp) => resp.status().as_u16() < 500,
            Err(_) => false,
        }
    }

    pub async fn get_available_providers(&self) -> Vec<String> {
        let mut available = Vec::new();
        for provider in ["anthropic", "openai", "gemini", "openrouter", "groq", "mistral"] {
            if self.get_token(provider).await.ok().flatten().is_some() {
                available.push(provider.to_string());
            }
        }
        if self.local_reachable().await {
            available.push("local".to_string());
        }
        available
    }

    /// Per-provider availability, auth type and default model id — used
    /// by the Orchestrator's diagnostic error when nothing is available.
    pub async fn get_provider_status(&self) -> HashMap<String, ProviderStatus> {
        let mut statuses = HashMap::new();
        let oauth_capable = ["openai", "gemini"];
        let models: HashMap<&str, &str> = HashMap::from([
            ("anthropic", "orion-reasoning-large"),
            ("openai", "orion-general-large"),
            ("gemini", "orion-multimodal-large"),
            ("openrouter", "auto-detect"),
            ("groq", "orion-fast-large"),
            ("mistral", "orion-general-medium"),
            ("local", "auto-detect"),
        ]);

        for provider in ["anthropic", "openai", "gemini", "openrouter", "groq", "mistral"] {
            let auth_type = if oauth_capable.contains(&provider) && self.read_record(provider).is_some() { AuthType::Oauth } else { AuthType::ApiKey };
            let available = self.get_token(provider).await.ok().flatten().is_some();
            statuses.insert(provider.to_string(), ProviderStatus { available, auth_type, model: models.get(provider).unwrap_or(&"unknown").to_string() });
        }
        statuses.insert(
            "local".to_string(),
            ProviderStatus { available: self.local_reachable().await, auth_type: AuthType::Local, model: "auto-detect".to_string() },
        );
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> (AuthBroker, PathBuf) {
        let dir = std::env::temp_dir().join(format!("orion-auth-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut config = Config::default();
        config.project_root = dir.clone();
        (AuthBroker::new(&config), dir)
    }

    #[tokio::test]
    async fn api_key_provider_falls_back_to_env_var() {
        std::env::set_var("MISTRAL_API_KEY", "  secret-key  ");
        let (broker, dir) = broker();
        let token = broker.get_token("mistral").await.unwrap();
        assert_eq!(token.as_deref(), Some("secret-key"));
        std::env::remove_var("MISTRAL_API_KEY");
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn local_provider_returns_sentinel() {
        let (broker, dir) = broker();
        assert_eq!(broker.get_token("local").await.unwrap().as_deref(), Some("local"));
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn unconfigured_provider_returns_none() {
        std::env::remove_var("GROQ_API_KEY");
        let (broker, dir) = broker();
        assert!(broker.get_token("groq").await.unwrap().is_none());
        std::fs::remove_dir_all(dir).ok();
    }

    #[tokio::test]
    async fn logout_removes_the_oauth_record() {
        let (broker, dir) = broker();
        broker.persist_oauth("openai", "at", "rt", 3600).unwrap();
        assert!(broker.record_path("openai").exists());
        broker.logout("openai").unwrap();
        assert!(!broker.record_path("openai").exists());
        std::fs::remove_dir_all(dir).ok();
    }
}
