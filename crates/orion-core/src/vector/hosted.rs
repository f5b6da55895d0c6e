// Hosted vector backend — a generic REST-over-pgvector shape: one table
// exposed through a PostgREST-style endpoint, matching the "hosted URL +
// key" pairing the config layer expects. Filters are applied server-side
// via query parameters; scoring happens in an RPC call the hosted side is
// expected to expose.

use super::{SearchHit, VectorBackend, VectorStats};
use crate::error::EngineResult;
use async_trait::async_trait;
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

pub struct HostedVectorStore {
    client: Client,
    base_url: String,
    key: String,
}

impl HostedVectorStore {
    pub fn new(base_url: String, key: String) -> Self {
        Self { client: Client::new(), base_url: base_url.trim_end_matches('/').to_string(), key }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .timeout(Duration::from_secs(30))
    }
}

#[async_trait]
impl VectorBackend for HostedVectorStore {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: Value) -> EngineResult<()> {
        let body = json!({ "id": id, "embedding": vector, "metadata": metadata });
        let resp = self
            .request(reqwest::Method::POST, "/rest/v1/memory_vectors?on_conflict=id")
            .header("Prefer", "resolution=merge-duplicates")
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(crate::error::EngineError::provider("hosted-vector", format!("upsert status {}", resp.status())));
        }
        Ok(())
    }

    async fn search(&self, vector: &[f32], top_k: usize, filter: Option<&HashMap<String, String>>) -> EngineResult<Vec<SearchHit>> {
        let body = json!({
            "query_embedding": vector,
            "match_count": top_k,
            "filter": filter.cloned().unwrap_or_default(),
        });
        let resp = self.request(reqwest::Method::POST, "/rest/v1/rpc/match_memory_vectors").json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(crate::error::EngineError::provider("hosted-vector", format!("search status {}", resp.status())));
        }
        let rows: Vec<Value> = resp.json().await?;
        Ok(rows
            .into_iter()
            .map(|row| SearchHit {
                id: row["id"].as_str().unwrap_or_default().to_string(),
                score: row["similarity"].as_f64().unwrap_or(0.0),
                metadata: row.get("metadata").cloned().unwrap_or(Value::Null),
            })
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> EngineResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let id_list = ids.iter().map(|id| urlencoding::encode(id).into_owned()).collect::<Vec<_>>().join(",");
        let path = format!("/rest/v1/memory_vectors?id=in.({id_list})");
        let resp = self.request(reqwest::Method::DELETE, &path).send().await?;
        if !resp.status().is_success() {
            warn!("[vector] hosted delete returned status {}", resp.status());
        }
        Ok(())
    }

    async fn stats(&self) -> EngineResult<VectorStats> {
        let resp = self.request(reqwest::Method::GET, "/rest/v1/memory_vectors?select=id").header("Prefer", "count=exact").send().await?;
        let count = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split('/').nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(VectorStats { backend: "hosted".to_string(), total_vectors: count })
    }
}
