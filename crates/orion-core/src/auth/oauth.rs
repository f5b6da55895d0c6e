// OAuth 2.0 device-code flow for the "openai" and "gemini" providers.

use super::AuthBroker;
use base64::Engine;
use log::{info, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("user denied access")]
    AccessDenied,
    #[error("device flow timed out waiting for approval")]
    TimedOut,
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

pub(super) fn client_id_for(provider: &str) -> String {
    std::env::var(format!("{}_OAUTH_CLIENT_ID", provider.to_uppercase())).unwrap_or_else(|_| format!("orion-{provider}-client"))
}

/// PKCE verifier/challenge pair (RFC 7636, S256). The verifier is a
/// 64-character unreserved-charset string built from two UUIDs with
/// their hyphens stripped, which already satisfies the 43-128 length
/// requirement without pulling in a dedicated RNG crate.
fn generate_pkce() -> (String, String) {
    let verifier = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}

/// The OpenAI device flow's poll step returns an authorization code,
/// not a token directly — it must be exchanged for one via PKCE.
struct PkceExchange {
    token_url: String,
    code_verifier: String,
    redirect_uri: String,
    client_id: String,
}

struct DeviceFlowSession {
    poll_url: String,
    poll_body: Vec<(&'static str, String)>,
    verification_url: String,
    user_code: String,
    interval: u64,
    total_timeout: Duration,
    exchange: Option<PkceExchange>,
}

/// Runs the device-code flow to completion: prints the verification URL +
/// code, then polls until approval, denial, or timeout.
pub async fn login(broker: &AuthBroker, provider: &str) -> Result<(), OAuthError> {
    let client = reqwest::Client::new();
    let session = match provider {
        "openai" => start_openai(&client).await?,
        "gemini" => start_gemini(&client).await?,
        other => return Err(OAuthError::UnsupportedProvider(other.to_string())),
    };

    info!("[auth] visit {} and enter code {}", session.verification_url, session.user_code);
    println!("To authorize {provider}, visit: {}", session.verification_url);
    println!("Enter code: {}", session.user_code);

    poll_until_done(broker, &client, provider, session).await
}

async fn start_openai(client: &reqwest::Client) -> Result<DeviceFlowSession, OAuthError> {
    let client_id = client_id_for("openai");
    let (code_verifier, code_challenge) = generate_pkce();
    let redirect_uri = "https://auth.openai.com/deviceauth/callback".to_string();

    let resp = client
        .post("https://auth.openai.com/api/accounts/deviceauth/usercode")
        .form(&[
            ("client_id", client_id.as_str()),
            ("code_challenge", code_challenge.as_str()),
            ("code_challenge_method", "S256"),
        ])
        .send()
        .await?;
    let body: Value = resp.json().await?;
    let device_auth_id = body["device_auth_id"].as_str().unwrap_or_default().to_string();
    let user_code = body["user_code"].as_str().unwrap_or_default().to_string();
    let interval = body["interval"].as_u64().unwrap_or(5);

    Ok(DeviceFlowSession {
        poll_url: "https://auth.openai.com/api/accounts/deviceauth/token".to_string(),
        poll_body: vec![("device_auth_id", device_auth_id), ("user_code", user_code.clone())],
        verification_url: "https://auth.openai.com/codex/device".to_string(),
        user_code,
        interval,
        total_timeout: Duration::from_secs(15 * 60),
        exchange: Some(PkceExchange { token_url: "https://auth.openai.com/oauth/token".to_string(), code_verifier, redirect_uri, client_id }),
    })
}

async fn start_gemini(client: &reqwest::Client) -> Result<DeviceFlowSession, OAuthError> {
    let client_id = client_id_for("gemini");
    let resp = client
        .post("https://oauth2.googleapis.com/device/code")
        .form(&[("client_id", client_id.as_str()), ("scope", "https://www.googleapis.com/auth/generative-language")])
        .send()
        .await?;
    let body: Value = resp.json().await?;
    let device_code = body["device_code"].as_str().unwrap_or_default().to_string();
    let user_code = body["user_code"].as_str().unwrap_or_default().to_string();
    let verification_url = body["verification_url"].as_str().unwrap_or("https://www.google.com/device").to_string();
    let interval = body["interval"].as_u64().unwrap_or(5);

    Ok(DeviceFlowSession {
        poll_url: "https://oauth2.googleapis.com/token".to_string(),
        poll_body: vec![
            ("device_code", device_code),
            ("client_id", client_id),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code".to_string()),
        ],
        verification_url,
        user_code,
        interval,
        total_timeout: Duration::from_secs(5 * 60),
        exchange: None,
    })
}

async fn poll_until_done(broker: &AuthBroker, client: &reqwest::Client, provider: &str, session: DeviceFlowSession) -> Result<(), OAuthError> {
    let deadline = tokio::time::Instant::now() + session.total_timeout;
    let mut interval = session.interval;

    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(interval)).await;

        let form: Vec<(&str, &str)> = session.poll_body.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let resp = client.post(&session.poll_url).form(&form).send().await?;
        let body: Value = resp.json().await?;

        if let Some(exchange) = &session.exchange {
            if let Some(authorization_code) = body["authorization_code"].as_str() {
                let tokens = exchange_code(client, exchange, authorization_code).await?;
                persist_tokens(broker, provider, &tokens);
                info!("[auth] {provider} login succeeded");
                return Ok(());
            }
        } else if body["access_token"].as_str().is_some() {
            persist_tokens(broker, provider, &body);
            info!("[auth] {provider} login succeeded");
            return Ok(());
        }

        match body["error"].as_str() {
            Some("authorization_pending") => continue,
            Some("slow_down") => interval = (interval + 2).min(30),
            Some("access_denied") => return Err(OAuthError::AccessDenied),
            Some(other) => warn!("[auth] {provider} device poll returned error '{other}'"),
            None => {}
        }
    }

    Err(OAuthError::TimedOut)
}

/// PKCE code exchange: trades the device poll's `authorization_code`
/// plus the original `code_verifier` for an access/refresh token pair.
async fn exchange_code(client: &reqwest::Client, exchange: &PkceExchange, authorization_code: &str) -> Result<Value, OAuthError> {
    let resp = client
        .post(&exchange.token_url)
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", authorization_code),
            ("code_verifier", exchange.code_verifier.as_str()),
            ("redirect_uri", exchange.redirect_uri.as_str()),
            ("client_id", exchange.client_id.as_str()),
        ])
        .send()
        .await?;
    Ok(resp.json().await?)
}

fn persist_tokens(broker: &AuthBroker, provider: &str, body: &Value) {
    let access_token = body["access_token"].as_str().unwrap_or_default();
    let refresh_token = body["refresh_token"].as_str().unwrap_or_default();
    let expires_in = body["expires_in"].as_i64().unwrap_or(3600);
    if let Err(e) = broker.persist_oauth(provider, access_token, refresh_token, expires_in) {
        warn!("[auth] failed to persist {provider} token: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_for_falls_back_to_default() {
        std::env::remove_var("OPENAI_OAUTH_CLIENT_ID");
        assert_eq!(client_id_for("openai"), "orion-openai-client");
    }

    #[test]
    fn client_id_for_honors_env_override() {
        std::env::set_var("GEMINI_OAUTH_CLIENT_ID", "custom-id");
        assert_eq!(client_id_for("gemini"), "custom-id");
        std::env::remove_var("GEMINI_OAUTH_CLIENT_ID");
    }

    #[test]
    fn generate_pkce_produces_distinct_verifier_and_challenge() {
        let (verifier, challenge) = generate_pkce();
        assert_eq!(verifier.len(), 64);
        assert!(verifier.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(verifier, challenge);
        assert!(!challenge.is_empty());
    }

    #[test]
    fn generate_pkce_is_not_deterministic() {
        let (first, _) = generate_pkce();
        let (second, _) = generate_pkce();
        assert_ne!(first, second);
    }
}
