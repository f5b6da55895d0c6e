// Memory Facade — the one door other components use to read and write
// conversational memory, hiding the relational/vector split underneath.

use crate::error::EngineResult;
use crate::store::{Message, RelationalStore, Role};
use crate::vector::{EmbeddingClient, VectorBackend};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use log::warn;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Summarizes a transcript into a short recap. Implemented by the
/// Orchestrator; kept as a trait here so this module never depends on it
/// directly.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> EngineResult<String>;
}

pub struct RelevantMessage {
    pub id: String,
    pub score: f64,
    pub role: Role,
    pub content: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactCategory {
    Preference,
    Context,
    Instruction,
}

impl FactCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactCategory::Preference => "preference",
            FactCategory::Context => "context",
            FactCategory::Instruction => "instruction",
        }
    }
}

pub struct MemorableFact {
    pub category: FactCategory,
    pub text: String,
}

const PREFERENCE_MARKERS: [&str; 2] = ["i prefer", "i like"];
const INSTRUCTION_MARKERS: [&str; 2] = ["always", "never"];
const CONTEXT_MARKERS: [&str; 2] = ["remember that", "my name is"];

/// Substring/keyword classifier tagging a message as preference, context
/// or instruction. Never blocks the caller — failures are the caller's
/// problem to swallow, not this function's (it cannot fail).
pub fn extract_memorable_facts(text: &str) -> Vec<MemorableFact> {
    let lower = text.to_lowercase();
    let mut facts = Vec::new();
    if PREFERENCE_MARKERS.iter().any(|m| lower.contains(m)) {
        facts.push(MemorableFact { category: FactCategory::Preference, text: text.to_string() });
    }
    if INSTRUCTION_MARKERS.iter().any(|m| lower.contains(m)) {
        facts.push(MemorableFact { category: FactCategory::Instruction, text: text.to_string() });
    }
    if CONTEXT_MARKERS.iter().any(|m| lower.contains(m)) {
        facts.push(MemorableFact { category: FactCategory::Context, text: text.to_string() });
    }
    facts
}

pub struct MemoryFacade {
    store: Arc<RelationalStore>,
    vectors: Arc<dyn VectorBackend>,
    embedder: Arc<EmbeddingClient>,
}

impl MemoryFacade {
    pub fn new(store: Arc<RelationalStore>, vectors: Arc<dyn VectorBackend>, embedder: Arc<EmbeddingClient>) -> Self {
        Self { store, vectors, embedder }
    }

    pub async fn save_message(&self, user_name: &str, role: Role, content: &str, metadata: Value) -> EngineResult<Message> {
        let user = self.store.get_or_create_user(user_name)?;
        let session = self.store.get_or_create_active_session(user.id)?;
        let message = self.store.insert_message(user.id, Some(session.id), role.clone(), content, &metadata)?;
        self.store.increment_session_message_count(session.id)?;

        if let Err(e) = self.upsert_vector(&message).await {
            warn!("[memory] vector upsert failed for message {}: {e}", message.id);
        }

        if role == Role::User {
            for fact in extract_memorable_facts(content) {
                let mut fact_metadata = metadata_base(user.id, &role, &message.timestamp);
                fact_metadata["fact_category"] = Value::String(fact.category.as_str().to_string());
                fact_metadata["text"] = Value::String(fact.text.clone());
                if let Err(e) = self.vectors.upsert(&format!("{}-fact-{}", message.id, fact.category.as_str()), vec![], fact_metadata).await
                {
                    warn!("[memory] fact upsert failed: {e}");
                }
            }
        }

        Ok(message)
    }

    async fn upsert_vector(&self, message: &Message) -> EngineResult<()> {
        let vector = self.embedder.embed(&message.content).await?;
        let mut metadata = metadata_base(message.user_id, &message.role, &message.timestamp);
        metadata["text"] = Value::String(message.content.clone());
        if let Value::Object(extra) = &message.metadata {
            if let Value::Object(target) = &mut metadata {
                for (k, v) in extra {
                    if v.is_string() || v.is_number() || v.is_boolean() {
                        target.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        self.vectors.upsert(&message.id.to_string(), vector, metadata).await
    }

    pub fn get_history(&self, user_name: &str, limit: i64) -> EngineResult<Vec<Message>> {
        let user = self.store.get_or_create_user(user_name)?;
        self.store.get_history(user.id, limit)
    }

    pub async fn get_relevant_context(&self, user_name: &str, query: &str, top_k: usize) -> EngineResult<Vec<RelevantMessage>> {
        let user = self.store.get_or_create_user(user_name)?;
        let vector = self.embedder.embed(query).await?;
        let mut filter = HashMap::new();
        filter.insert("user_id".to_string(), user.id.to_string());
        let hits = self.vectors.search(&vector, top_k, Some(&filter)).await?;

        Ok(hits
            .into_iter()
            .map(|hit| RelevantMessage {
                id: hit.id,
                score: hit.score,
                role: hit.metadata.get("role").and_then(|v| v.as_str()).and_then(Role::parse).unwrap_or(Role::User),
                content: hit.metadata.get("text").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                timestamp: hit
                    .metadata
                    .get("timestamp")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(Utc::now),
                metadata: hit.metadata,
            })
            .collect())
    }

    pub async fn compress_old_sessions(&self, user_name: &str, older_than_days: i64, summarizer: Option<&dyn Summarizer>) -> EngineResult<usize> {
        let user = self.store.get_or_create_user(user_name)?;
        let cutoff = Utc::now() - Duration::days(older_than_days);
        let sessions = self.store.sessions_pending_compression(user.id, cutoff)?;

        let mut compressed = 0;
        for session in sessions {
            let messages = self.store.get_messages_for_session(session.id)?;
            if messages.is_empty() {
                continue;
            }
            let transcript: String = messages.iter().map(|m| format!("[{}] {}\n", m.role.as_str(), m.content)).collect();

            let summary = match summarizer {
                Some(s) => s.summarize(&transcript).await.unwrap_or_else(|_| fallback_summary(&transcript)),
                None => fallback_summary(&transcript),
            };

            let start = messages.first().map(|m| m.timestamp).unwrap_or_else(Utc::now);
            let end = messages.last().map(|m| m.timestamp).unwrap_or_else(Utc::now);
            self.store
                .write_compressed_memory(user.id, session.id, &summary, messages.len() as i64, start, end)?;

            let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
            self.store.delete_messages(&ids)?;

            let vector_ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            if let Err(e) = self.vectors.delete(&vector_ids).await {
                warn!("[memory] vector delete failed during compression of session {}: {e}", session.id);
            }

            compressed += 1;
        }
        Ok(compressed)
    }
}

fn fallback_summary(transcript: &str) -> String {
    let truncated: String = transcript.chars().take(1000).collect();
    format!("[Auto-summary] {truncated}…")
}

fn metadata_base(user_id: Uuid, role: &Role, timestamp: &chrono::DateTime<Utc>) -> Value {
    serde_json::json!({
        "user_id": user_id.to_string(),
        "role": role.as_str(),
        "timestamp": timestamp.to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::LocalVectorStore;

    fn facade() -> MemoryFacade {
        let store = Arc::new(RelationalStore::open_in_memory().unwrap());
        let dir = std::env::temp_dir().join(format!("orion-memory-test-{}", Uuid::new_v4()));
        let vectors: Arc<dyn VectorBackend> = Arc::new(LocalVectorStore::new(dir));
        let embedder = Arc::new(EmbeddingClient::new("http://127.0.0.1:1", "nomic-embed-text", None));
        MemoryFacade::new(store, vectors, embedder)
    }

    #[tokio::test]
    async fn save_message_survives_vector_failure() {
        let facade = facade();
        let msg = facade.save_message("nadia", Role::User, "hello there", Value::Null).await.unwrap();
        assert_eq!(msg.content, "hello there");
        let history = facade.get_history("nadia", 10).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn extract_memorable_facts_tags_preference() {
        let facts = extract_memorable_facts("I prefer tea over coffee");
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].category, FactCategory::Preference);
    }

    #[test]
    fn extract_memorable_facts_returns_empty_for_plain_text() {
        assert!(extract_memorable_facts("what's the weather like").is_empty());
    }

    #[tokio::test]
    async fn compress_old_sessions_falls_back_without_summarizer() {
        let facade = facade();
        facade.save_message("nadia", Role::User, "a long time ago", Value::Null).await.unwrap();
        let user = facade.store.get_or_create_user("nadia").unwrap();
        let session = facade.store.get_active_session(user.id).unwrap().unwrap();
        facade.store.end_session(session.id).unwrap();

        // Force the session to look old enough to compress.
        {
            let conn = facade.store.conn.lock();
            let old = (Utc::now() - Duration::days(40)).to_rfc3339();
            conn.execute("UPDATE sessions SET ended_at = ?1 WHERE id = ?2", rusqlite::params![old, session.id.to_string()]).unwrap();
        }

        let compressed = facade.compress_old_sessions("nadia", 30, None).await.unwrap();
        assert_eq!(compressed, 1);
        assert!(facade.get_history("nadia", 10).unwrap().is_empty());
    }
}
