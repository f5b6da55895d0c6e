// Context Assembler — builds the message list handed to a provider from
// persona, RAG context, relevant past conversation and recent history,
// then truncates it to a token budget.

use crate::memory::MemoryFacade;
use crate::providers::ChatMessage;
use crate::rag::RagIngest;
use crate::store::Role;
use log::warn;
use std::sync::Arc;
use uuid::Uuid;

const RELEVANCE_THRESHOLD: f64 = 0.5;
const MAX_RELEVANT_MESSAGES: usize = 3;
const RELEVANT_SNIPPET_CHARS: usize = 200;
const RECENT_HISTORY_LIMIT: i64 = 20;

const DEFAULT_PERSONA: &str = "You are Orion, a persistent AI companion. Speak naturally and remember what matters to the person you're talking with.";

pub struct ContextAssembler {
    memory: Arc<MemoryFacade>,
    rag: Arc<RagIngest>,
    persona: String,
}

impl ContextAssembler {
    pub fn new(memory: Arc<MemoryFacade>, rag: Arc<RagIngest>) -> Self {
        Self { memory, rag, persona: DEFAULT_PERSONA.to_string() }
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = persona.into();
        self
    }

    /// Assembles the full message list for one turn. Any subsystem
    /// failure (RAG, relevant-context lookup) degrades gracefully rather
    /// than failing the whole turn — it is logged and skipped.
    pub async fn build(&self, user_name: &str, user_id: Uuid, prompt: &str) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system(&self.persona)];

        match self.rag.build_context(prompt, user_id).await {
            Ok(context) if !context.is_empty() => {
                messages.push(ChatMessage::system(format!("Relevant background information:\n\n{context}")));
            }
            Ok(_) => {}
            Err(e) => warn!("[context] RAG context lookup failed: {e}"),
        }

        match self.memory.get_relevant_context(user_name, prompt, MAX_RELEVANT_MESSAGES * 2).await {
            Ok(hits) => {
                let relevant: Vec<String> = hits
                    .into_iter()
                    .filter(|h| h.score > RELEVANCE_THRESHOLD)
                    .take(MAX_RELEVANT_MESSAGES)
                    .map(|h| {
                        let snippet: String = h.content.chars().take(RELEVANT_SNIPPET_CHARS).collect();
                        format!("[{}] {snippet}", h.role.as_str())
                    })
                    .collect();
                if !relevant.is_empty() {
                    messages.push(ChatMessage::system(format!("Relevant past conversation:\n{}", relevant.join("\n"))));
                }
            }
            Err(e) => warn!("[context] relevant-context lookup failed: {e}"),
        }

        match self.memory.get_history(user_name, RECENT_HISTORY_LIMIT) {
            Ok(history) => {
                for message in history {
                    messages.push(match message.role {
                        Role::User => ChatMessage::user(message.content),
                        Role::Assistant => ChatMessage::assistant(message.content),
                        Role::System => ChatMessage::system(message.content),
                    });
                }
            }
            Err(e) => warn!("[context] history lookup failed: {e}"),
        }

        messages.push(ChatMessage::user(prompt));
        messages
    }
}

/// Approximates tokens as `chars / 4`. System messages are always kept,
/// in order, at the front; remaining messages are accepted most-recent
/// first until the budget runs out. If the system messages alone exceed
/// the budget, only the first one survives.
pub fn truncate_context(messages: Vec<ChatMessage>, max_tokens: usize) -> Vec<ChatMessage> {
    let approx_tokens = |s: &str| s.len() / 4;

    let (system, rest): (Vec<ChatMessage>, Vec<ChatMessage>) = messages.into_iter().partition(|m| m.role == crate::providers::ChatRole::System);

    let system_tokens: usize = system.iter().map(|m| approx_tokens(&m.content)).sum();
    if system_tokens > max_tokens {
        return system.into_iter().take(1).collect();
    }

    let mut budget = max_tokens - system_tokens;
    let mut kept_rest = Vec::new();
    for message in rest.into_iter().rev() {
        let cost = approx_tokens(&message.content);
        if cost > budget {
            break;
        }
        budget -= cost;
        kept_rest.push(message);
    }
    kept_rest.reverse();

    let mut out = system;
    out.extend(kept_rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatRole;

    #[test]
    fn truncate_keeps_system_messages_and_most_recent_turns() {
        let messages = vec![
            ChatMessage::system("persona"),
            ChatMessage::user("a".repeat(400)),
            ChatMessage::assistant("b".repeat(400)),
            ChatMessage::user("most recent"),
        ];
        let truncated = truncate_context(messages, 150);
        assert_eq!(truncated[0].role, ChatRole::System);
        assert_eq!(truncated.last().unwrap().content, "most recent");
    }

    #[test]
    fn truncate_falls_back_to_first_system_message_when_system_alone_overflows() {
        let messages = vec![ChatMessage::system("a".repeat(2000)), ChatMessage::system("b".repeat(2000)), ChatMessage::user("hi")];
        let truncated = truncate_context(messages, 10);
        assert_eq!(truncated.len(), 1);
        assert_eq!(truncated[0].content, "a".repeat(2000));
    }

    #[test]
    fn truncate_with_generous_budget_keeps_everything() {
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let truncated = truncate_context(messages.clone(), 10_000);
        assert_eq!(truncated.len(), messages.len());
    }
}
