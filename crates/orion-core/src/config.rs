// Process-level configuration: environment + an optional `orion.toml`,
// resolved once at startup and threaded through construction from there on.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root directory all relative state paths (`policy.yaml`, `chroma_data/`,
    /// `.orion/auth/`, `logs/`) are resolved against.
    pub project_root: PathBuf,
    pub policy_path: PathBuf,
    pub triggers_path: PathBuf,
    pub daemon_interval_seconds: u64,
    pub context_token_budget: usize,
    pub vector_store: VectorStoreConfig,
    pub local_provider_base_url: String,
    pub channel: ChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub hosted_url: Option<String>,
    pub hosted_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub base_url: Option<String>,
    pub bot_token: Option<String>,
    /// Default recipient chat id used by the daemon's proactive outreach.
    pub default_recipient: String,
}

impl Default for Config {
    fn default() -> Self {
        let project_root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".orion");
        Self {
            policy_path: project_root.join("policy.yaml"),
            triggers_path: project_root.join("background").join("triggers.yaml"),
            project_root,
            daemon_interval_seconds: 60,
            context_token_budget: 8000,
            vector_store: VectorStoreConfig { hosted_url: None, hosted_key: None },
            local_provider_base_url: "http://localhost:11434".to_string(),
            channel: ChannelConfig { base_url: None, bot_token: None, default_recipient: "owner".to_string() },
        }
    }
}

impl Config {
    /// Load configuration from (in increasing priority) built-in defaults,
    /// an optional `orion.toml` in the current directory, then environment
    /// variables.
    pub fn load() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Ok(text) = std::fs::read_to_string("orion.toml") {
            let from_file: TomlOverrides = toml::from_str(&text)
                .map_err(|e| EngineError::Config(format!("invalid orion.toml: {e}")))?;
            from_file.apply(&mut config);
        }

        if let Ok(root) = std::env::var("ORION_PROJECT_ROOT") {
            config.project_root = PathBuf::from(&root);
            config.policy_path = Path::new(&root).join("policy.yaml");
            config.triggers_path = Path::new(&root).join("background").join("triggers.yaml");
        }
        if let Ok(v) = std::env::var("ORION_DAEMON_INTERVAL_SECONDS") {
            config.daemon_interval_seconds = v.parse().map_err(|_| {
                EngineError::Config("ORION_DAEMON_INTERVAL_SECONDS must be an integer".into())
            })?;
        }
        if let Ok(v) = std::env::var("ORION_CONTEXT_TOKEN_BUDGET") {
            config.context_token_budget = v.parse().map_err(|_| {
                EngineError::Config("ORION_CONTEXT_TOKEN_BUDGET must be an integer".into())
            })?;
        }
        if let Ok(v) = std::env::var("OLLAMA_BASE_URL") {
            config.local_provider_base_url = v;
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            config.vector_store.hosted_url = Some(url);
        }
        if let Ok(key) = std::env::var("SUPABASE_KEY") {
            config.vector_store.hosted_key = Some(key);
        }
        if let Ok(url) = std::env::var("ORION_CHANNEL_BASE_URL") {
            config.channel.base_url = Some(url);
        }
        if let Ok(token) = std::env::var("ORION_CHANNEL_BOT_TOKEN") {
            config.channel.bot_token = Some(token);
        }
        if let Ok(recipient) = std::env::var("ORION_CHANNEL_DEFAULT_RECIPIENT") {
            config.channel.default_recipient = recipient;
        }

        Ok(config)
    }

    pub fn chroma_data_dir(&self) -> PathBuf {
        self.project_root.join("chroma_data")
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.project_root.join(".orion").join("auth")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.project_root.join("logs")
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.project_root.join("orion.db")
    }
}

#[derive(Debug, Default, Deserialize)]
struct TomlOverrides {
    project_root: Option<PathBuf>,
    daemon_interval_seconds: Option<u64>,
    context_token_budget: Option<usize>,
    local_provider_base_url: Option<String>,
}

impl TomlOverrides {
    fn apply(self, config: &mut Config) {
        if let Some(root) = self.project_root {
            config.policy_path = root.join("policy.yaml");
            config.triggers_path = root.join("background").join("triggers.yaml");
            config.project_root = root;
        }
        if let Some(v) = self.daemon_interval_seconds {
            config.daemon_interval_seconds = v;
        }
        if let Some(v) = self.context_token_budget {
            config.context_token_budget = v;
        }
        if let Some(v) = self.local_provider_base_url {
            config.local_provider_base_url = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_paths() {
        let config = Config::default();
        assert_eq!(config.daemon_interval_seconds, 60);
        assert!(config.policy_path.ends_with("policy.yaml"));
        assert!(config.triggers_path.ends_with("triggers.yaml"));
    }

    #[test]
    fn chroma_dir_is_under_project_root() {
        let config = Config::default();
        assert!(config.chroma_data_dir().starts_with(&config.project_root));
    }
}
