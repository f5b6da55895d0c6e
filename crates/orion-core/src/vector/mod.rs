// Vector Store — abstract semantic-search backend with two concrete
// implementations, selected once at startup from config.

mod embedding;
mod hosted;
mod local;

pub use embedding::EmbeddingClient;
pub use hosted::HostedVectorStore;
pub use local::LocalVectorStore;

use crate::config::Config;
use crate::error::EngineResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub metadata: Value,
}

#[derive(Debug, Clone, Default)]
pub struct VectorStats {
    pub backend: String,
    pub total_vectors: usize,
}

#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Idempotent: same `id` replaces the prior entry. `metadata.text` is
    /// always set to `content` by the caller before this is invoked.
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> EngineResult<()>;

    /// Cosine similarity search, score in `[0, 1]`. `filter` is an
    /// equality map applied against `metadata`.
    async fn search(&self, vector: &[f32], top_k: usize, filter: Option<&HashMap<String, String>>) -> EngineResult<Vec<SearchHit>>;

    async fn delete(&self, ids: &[String]) -> EngineResult<()>;

    async fn stats(&self) -> EngineResult<VectorStats>;
}

/// Cosine similarity between two equal-length vectors; 0.0 on mismatch or
/// zero-length input.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// Build the configured backend: hosted if a URL + key pair is present,
/// otherwise the embedded local store under `<project>/chroma_data/`.
pub fn build_backend(config: &Config) -> EngineResult<Arc<dyn VectorBackend>> {
    if let (url, Some(key)) = (&config.vector_store.hosted_url, &config.vector_store.hosted_key) {
        if !url.is_empty() {
            return Ok(Arc::new(HostedVectorStore::new(url.clone(), key.clone())));
        }
    }
    Ok(Arc::new(LocalVectorStore::new(config.chroma_data_dir())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![1.0f32, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
