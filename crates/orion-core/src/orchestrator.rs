// Orchestrator — task-type to provider routing, and free-text routing to
// an agent category, both via static priority/score tables.

use crate::auth::AuthBroker;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::providers::{AnthropicProvider, GeminiProvider, LocalProvider, OpenAiCompatibleProvider, ProviderEngine};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

fn priority_list(task_type: &str) -> &'static [&'static str] {
    match task_type {
        "reasoning" => &["anthropic", "openai", "gemini", "openrouter", "groq", "local"],
        "code" => &["openai", "anthropic", "groq", "openrouter", "local"],
        "fast" => &["groq", "gemini", "local", "anthropic"],
        "multimodal" | "vision" => &["gemini", "openai", "anthropic"],
        _ => priority_list("reasoning"),
    }
}

const FULL_ROSTER: &[&str] = &["anthropic", "openai", "gemini", "openrouter", "groq", "mistral", "local"];

const AGENT_KEYWORDS: &[(&str, &[&str])] = &[
    ("research", &["research", "investigate", "look up", "find out", "study"]),
    ("browsing", &["browse", "website", "url", "navigate", "open page"]),
    ("file", &["file", "document", "folder", "directory", "disk"]),
    ("calendar", &["calendar", "schedule", "meeting", "appointment", "event"]),
    ("system", &["system", "process", "memory usage", "cpu", "disk space"]),
    ("code", &["code", "function", "bug", "compile", "programming"]),
    ("analysis", &["analyze", "analysis", "compare", "evaluate", "summarize data"]),
];

pub struct Orchestrator {
    config: Arc<Config>,
    auth: Arc<AuthBroker>,
    cache: Mutex<HashMap<String, Arc<dyn ProviderEngine>>>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, auth: Arc<AuthBroker>) -> Self {
        Self { config, auth, cache: Mutex::new(HashMap::new()) }
    }

    /// Pre-seeds the engine cache with fakes so routing/fallback order can
    /// be exercised without live provider credentials or network access.
    pub fn with_engines_for_test(config: Arc<Config>, auth: Arc<AuthBroker>, engines: HashMap<String, Arc<dyn ProviderEngine>>) -> Self {
        Self { config, auth, cache: Mutex::new(engines) }
    }

    async fn engine_for(&self, provider: &str) -> EngineResult<Arc<dyn ProviderEngine>> {
        if let Some(engine) = self.cache.lock().get(provider).cloned() {
            return Ok(engine);
        }

        let engine: Arc<dyn ProviderEngine> = match provider {
            "anthropic" => {
                let token = self.auth.get_token("anthropic").await?.ok_or_else(|| EngineError::provider("anthropic", "no credential"))?;
                Arc::new(AnthropicProvider::new(token))
            }
            "openai" => {
                let token = self.auth.get_token("openai").await?.ok_or_else(|| EngineError::provider("openai", "no credential"))?;
                Arc::new(OpenAiCompatibleProvider::new("openai", "https://api.openai.com", Some(token), "orion-general-large"))
            }
            "gemini" => {
                let token = self.auth.get_token("gemini").await?.ok_or_else(|| EngineError::provider("gemini", "no credential"))?;
                Arc::new(GeminiProvider::new(token))
            }
            "openrouter" => {
                let token = self.auth.get_token("openrouter").await?.ok_or_else(|| EngineError::provider("openrouter", "no credential"))?;
                Arc::new(
                    OpenAiCompatibleProvider::new("openrouter", "https://openrouter.ai/api/v1", Some(token), "auto")
                        .with_header("HTTP-Referer", "https://orion.local"),
                )
            }
            "groq" => {
                let token = self.auth.get_token("groq").await?.ok_or_else(|| EngineError::provider("groq", "no credential"))?;
                Arc::new(OpenAiCompatibleProvider::new("groq", "https://api.groq.com/openai", Some(token), "orion-fast-large"))
            }
            "mistral" => {
                let token = self.auth.get_token("mistral").await?.ok_or_else(|| EngineError::provider("mistral", "no credential"))?;
                Arc::new(OpenAiCompatibleProvider::new("mistral", "https://api.mistral.ai", Some(token), "orion-general-medium"))
            }
            "local" => Arc::new(LocalProvider::new(&self.config.local_provider_base_url, "auto-detect")),
            other => return Err(EngineError::provider(other, "unknown provider")),
        };

        self.cache.lock().insert(provider.to_string(), engine.clone());
        Ok(engine)
    }

    /// Walk `task_type`'s priority list; fall back to the full roster if
    /// none on the list are available. Errors with a per-provider
    /// diagnostic when nothing anywhere is available.
    pub async fn route(&self, task_type: &str) -> EngineResult<Arc<dyn ProviderEngine>> {
        for provider in priority_list(task_type) {
            if let Ok(engine) = self.engine_for(provider).await {
                if engine.is_available().await {
                    return Ok(engine);
                }
            }
        }

        for provider in FULL_ROSTER {
            if priority_list(task_type).contains(provider) {
                continue;
            }
            if let Ok(engine) = self.engine_for(provider).await {
                if engine.is_available().await {
                    return Ok(engine);
                }
            }
        }

        let statuses = self.auth.get_provider_status().await;
        let diagnostic = FULL_ROSTER
            .iter()
            .map(|p| match statuses.get(*p) {
                Some(status) => format!("{p}: available={}", status.available),
                None => format!("{p}: unknown"),
            })
            .collect::<Vec<_>>()
            .join(", ");
        Err(EngineError::provider("orchestrator", format!("no provider available for task '{task_type}' — {diagnostic}")))
    }

    /// Highest keyword score across the agent-category table; zero score
    /// falls back to "general".
    pub fn route_to_agent(&self, task: &str) -> String {
        let lower = task.to_lowercase();
        let mut best = ("general", 0usize);
        for (category, keywords) in AGENT_KEYWORDS {
            let score = keywords.iter().filter(|k| lower.contains(*k)).count();
            if score > best.1 {
                best = (category, score);
            }
        }
        best.0.to_string()
    }
}

#[async_trait]
impl crate::memory::Summarizer for Orchestrator {
    async fn summarize(&self, transcript: &str) -> EngineResult<String> {
        let engine = self.route("reasoning").await?;
        let prompt = format!("Summarize the following conversation in 2-3 sentences:\n\n{transcript}");
        let context = [crate::providers::ChatMessage::system("You write terse, factual conversation summaries.")];
        Ok(engine.generate(&prompt, &context).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Orchestrator {
        let config = Arc::new(Config::default());
        let auth = Arc::new(AuthBroker::new(&config));
        Orchestrator::new(config, auth)
    }

    #[test]
    fn route_to_agent_picks_highest_scoring_category() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.route_to_agent("can you schedule a meeting for tomorrow?"), "calendar");
    }

    #[test]
    fn route_to_agent_falls_back_to_general() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.route_to_agent("tell me a joke"), "general");
    }

    #[test]
    fn priority_list_unknown_task_type_falls_back_to_reasoning() {
        assert_eq!(priority_list("unknown-task"), priority_list("reasoning"));
    }

    #[tokio::test]
    async fn route_errors_with_diagnostic_when_nothing_is_configured() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
        std::env::remove_var("GEMINI_API_KEY");
        std::env::remove_var("OPENROUTER_API_KEY");
        std::env::remove_var("GROQ_API_KEY");
        std::env::remove_var("MISTRAL_API_KEY");

        let config = Arc::new({
            let mut c = Config::default();
            c.local_provider_base_url = "http://127.0.0.1:1".to_string();
            c
        });
        let auth = Arc::new(AuthBroker::new(&config));
        let orchestrator = Orchestrator::new(config, auth);
        let err = orchestrator.route("reasoning").await.unwrap_err();
        assert!(matches!(err, EngineError::Provider { .. }));
    }
}
