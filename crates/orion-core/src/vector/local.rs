// Embedded local vector backend — JSON-lines file per collection, under
// `<project>/chroma_data/`. Rewritten atomically (temp file then rename)
// on every mutation so a crash mid-write never leaves a corrupt file.

use super::{cosine_similarity, SearchHit, VectorBackend, VectorStats};
use crate::error::EngineResult;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: Value,
}

pub struct LocalVectorStore {
    path: PathBuf,
    entries: Mutex<Vec<Entry>>,
}

impl LocalVectorStore {
    pub fn new(dir: PathBuf) -> Self {
        let path = dir.join("memories.jsonl");
        let entries = Self::load(&path);
        Self { path, entries: Mutex::new(entries) }
    }

    fn load(path: &PathBuf) -> Vec<Entry> {
        let Ok(content) = std::fs::read_to_string(path) else { return Vec::new() };
        content.lines().filter_map(|line| serde_json::from_str(line).ok()).collect()
    }

    fn flush(&self, entries: &[Entry]) -> EngineResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut body = String::new();
        for entry in entries {
            body.push_str(&serde_json::to_string(entry)?);
            body.push('\n');
        }
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for LocalVectorStore {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> EngineResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| e.id != id);
        entries.push(Entry { id: id.to_string(), vector, metadata });
        self.flush(&entries)
    }

    async fn search(&self, vector: &[f32], top_k: usize, filter: Option<&HashMap<String, String>>) -> EngineResult<Vec<SearchHit>> {
        let entries = self.entries.lock();
        let mut scored: Vec<SearchHit> = entries
            .iter()
            .filter(|e| matches_filter(&e.metadata, filter))
            .map(|e| SearchHit { id: e.id.clone(), score: cosine_similarity(vector, &e.vector), metadata: e.metadata.clone() })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, ids: &[String]) -> EngineResult<()> {
        let mut entries = self.entries.lock();
        entries.retain(|e| !ids.contains(&e.id));
        self.flush(&entries)
    }

    async fn stats(&self) -> EngineResult<VectorStats> {
        let entries = self.entries.lock();
        Ok(VectorStats { backend: "local".to_string(), total_vectors: entries.len() })
    }
}

fn matches_filter(metadata: &Value, filter: Option<&HashMap<String, String>>) -> bool {
    let Some(filter) = filter else { return true };
    filter.iter().all(|(k, v)| metadata.get(k).and_then(|mv| mv.as_str()).map(|mv| mv == v).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("orion-vector-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_id() {
        let store = LocalVectorStore::new(temp_dir());
        store.upsert("a", vec![1.0, 0.0], serde_json::json!({"text": "one"})).await.unwrap();
        store.upsert("a", vec![0.0, 1.0], serde_json::json!({"text": "two"})).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_vectors, 1);
    }

    #[tokio::test]
    async fn search_ranks_by_cosine_similarity() {
        let store = LocalVectorStore::new(temp_dir());
        store.upsert("near", vec![1.0, 0.0], Value::Null).await.unwrap();
        store.upsert("far", vec![0.0, 1.0], Value::Null).await.unwrap();
        let hits = store.search(&[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn filter_restricts_results() {
        let store = LocalVectorStore::new(temp_dir());
        store.upsert("a", vec![1.0], serde_json::json!({"user_id": "u1"})).await.unwrap();
        store.upsert("b", vec![1.0], serde_json::json!({"user_id": "u2"})).await.unwrap();
        let mut filter = HashMap::new();
        filter.insert("user_id".to_string(), "u2".to_string());
        let hits = store.search(&[1.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn delete_ignores_unknown_ids() {
        let store = LocalVectorStore::new(temp_dir());
        store.upsert("a", vec![1.0], Value::Null).await.unwrap();
        store.delete(&["missing".to_string(), "a".to_string()]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().total_vectors, 0);
    }
}
