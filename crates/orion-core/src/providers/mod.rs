// Provider Engines — one engine per LLM backend behind a single
// capability trait, so the Orchestrator can compose them blindly.

mod anthropic;
mod google;
mod local;
mod openai;

pub use anthropic::AnthropicProvider;
pub use google::GeminiProvider;
pub use local::LocalProvider;
pub use openai::OpenAiCompatibleProvider;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 529)
}

pub(crate) async fn retry_delay(attempt: u32) {
    let delay_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Canonical shape: system messages first, then the supplied context
/// unchanged, then the current turn as a final user message.
pub fn canonical_messages(context: &[ChatMessage], prompt: &str) -> Vec<ChatMessage> {
    let mut out: Vec<ChatMessage> = context.iter().filter(|m| m.role == ChatRole::System).cloned().collect();
    out.extend(context.iter().filter(|m| m.role != ChatRole::System).cloned());
    out.push(ChatMessage::user(prompt));
    out
}

#[async_trait]
pub trait ProviderEngine: Send + Sync {
    /// Never errors: transport/API failures come back as a `"[Error] …"`
    /// string so the Orchestrator can compose engines blindly.
    async fn generate(&self, prompt: &str, context: &[ChatMessage]) -> String;

    /// Yields non-empty content deltas; on failure yields a single
    /// `"[Error] …"` item then ends.
    async fn stream(&self, prompt: &str, context: &[ChatMessage]) -> BoxStream<'static, String>;

    async fn is_available(&self) -> bool;

    fn get_name(&self) -> &str;

    fn format_messages(&self, context: &[ChatMessage], prompt: &str) -> Vec<ChatMessage> {
        canonical_messages(context, prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_messages_orders_system_then_context_then_turn() {
        let context = vec![ChatMessage::user("earlier"), ChatMessage::system("persona")];
        let messages = canonical_messages(&context, "current turn");
        assert_eq!(messages[0].role, ChatRole::System);
        assert_eq!(messages.last().unwrap().content, "current turn");
        assert_eq!(messages.last().unwrap().role, ChatRole::User);
    }
}
