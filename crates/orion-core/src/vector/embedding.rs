// Embedding client — calls a local Ollama-compatible API or an
// OpenAI-compatible hosted endpoint to turn text into vectors.

use crate::error::EngineResult;
use log::{info, warn};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct EmbeddingClient {
    client: Client,
    local_base_url: String,
    local_model: String,
    hosted: Option<(String, String)>,
}

impl EmbeddingClient {
    pub fn new(local_base_url: impl Into<String>, local_model: impl Into<String>, hosted_openai_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            local_base_url: local_base_url.into(),
            local_model: local_model.into(),
            hosted: hosted_openai_key.map(|key| ("https://api.openai.com".to_string(), key)),
        }
    }

    /// Hosted embedding model if an OpenAI-like credential is configured;
    /// otherwise the local HTTP backend.
    pub async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        if let Some((base, key)) = &self.hosted {
            match self.embed_openai(base, key, text).await {
                Ok(v) => return Ok(v),
                Err(e) => warn!("[vector] hosted embedding failed, falling back to local: {e}"),
            }
        }
        self.embed_local(text).await
    }

    /// Ollama's current `/api/embed`, falling back to the legacy
    /// `/api/embeddings` shape.
    async fn embed_local(&self, text: &str) -> EngineResult<Vec<f32>> {
        let base = self.local_base_url.trim_end_matches('/');

        let new_url = format!("{base}/api/embed");
        let new_body = json!({ "model": self.local_model, "input": text });
        if let Ok(resp) = self.client.post(&new_url).json(&new_body).timeout(Duration::from_secs(60)).send().await {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(vec) = v["embeddings"][0].as_array().or_else(|| v["embedding"].as_array()) {
                        let out = to_f32_vec(vec);
                        if !out.is_empty() {
                            return Ok(out);
                        }
                    }
                }
            }
        }

        let legacy_url = format!("{base}/api/embeddings");
        let legacy_body = json!({ "model": self.local_model, "prompt": text });
        let resp = self
            .client
            .post(&legacy_url)
            .json(&legacy_body)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(|e| crate::error::EngineError::provider("local-embedding", format!("unreachable at {base}: {e}")))?;

        if !resp.status().is_success() {
            return Err(crate::error::EngineError::provider("local-embedding", format!("status {}", resp.status())));
        }
        let v: Value = resp.json().await?;
        let vec = v["embedding"].as_array().ok_or_else(|| crate::error::EngineError::provider("local-embedding", "no embedding array in response"))?;
        let out = to_f32_vec(vec);
        if out.is_empty() {
            return Err(crate::error::EngineError::provider("local-embedding", "empty embedding vector"));
        }
        Ok(out)
    }

    async fn embed_openai(&self, base: &str, key: &str, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{base}/v1/embeddings");
        let body = json!({ "model": "text-embedding-3-small", "input": text });
        let resp = self.client.post(&url).bearer_auth(key).json(&body).timeout(Duration::from_secs(30)).send().await?;
        if !resp.status().is_success() {
            return Err(crate::error::EngineError::provider("openai-embedding", format!("status {}", resp.status())));
        }
        let v: Value = resp.json().await?;
        let vec = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| crate::error::EngineError::provider("openai-embedding", "no data[0].embedding in response"))?;
        let out = to_f32_vec(vec);
        if out.is_empty() {
            return Err(crate::error::EngineError::provider("openai-embedding", "empty embedding vector"));
        }
        info!("[vector] hosted embedding produced {} dims", out.len());
        Ok(out)
    }
}

fn to_f32_vec(values: &[Value]) -> Vec<f32> {
    values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}
