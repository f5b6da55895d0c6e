// OpenAI-wire-compatible provider. Covers OpenAI, OpenRouter, Groq and
// Mistral — they all speak the same `/v1/chat/completions`-shaped REST
// surface modulo base url and auth header, which is what distinguishes
// them at construction time. The local Ollama backend has its own
// transport (see `local.rs`) and isn't built from this struct.

use super::{is_retryable_status, retry_delay, ChatMessage, ProviderEngine, MAX_RETRIES};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    auth_header: Option<String>,
    extra_headers: Vec<(String, String)>,
    model: String,
    name: String,
}

impl OpenAiCompatibleProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, auth_header: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            base_url: base_url.into(),
            auth_header,
            extra_headers: Vec::new(),
            model: model.into(),
            name: name.into(),
        }
    }

    /// OpenRouter requires an `HTTP-Referer` header alongside bearer auth.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((key.into(), value.into()));
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, format!("{}{}", self.base_url.trim_end_matches('/'), path));
        if let Some(auth) = &self.auth_header {
            builder = builder.header("Authorization", auth);
        }
        for (k, v) in &self.extra_headers {
            builder = builder.header(k, v);
        }
        builder
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": self.model,
            "stream": stream,
            "messages": messages.iter().map(|m| json!({"role": m.role.as_str(), "content": m.content})).collect::<Vec<_>>(),
        })
    }

    async fn chat_completion(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            let resp = self.request(reqwest::Method::POST, "/v1/chat/completions").json(&self.body(messages, false)).send().await;
            match resp {
                Ok(resp) if resp.status().is_success() => {
                    let v: Value = resp.json().await.map_err(|e| e.to_string())?;
                    let text = v["choices"][0]["message"]["content"].as_str().unwrap_or_default().to_string();
                    return Ok(text);
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if is_retryable_status(status) && attempt < MAX_RETRIES {
                        attempt += 1;
                        retry_delay(attempt).await;
                        continue;
                    }
                    let body = resp.text().await.unwrap_or_default();
                    return Err(format!("{status} {body}"));
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        attempt += 1;
                        retry_delay(attempt).await;
                        continue;
                    }
                    return Err(e.to_string());
                }
            }
        }
    }

    /// Parses one SSE `data:` line from an OpenAI-compatible stream,
    /// returning `None` once `[DONE]` or an empty delta is reached.
    fn parse_sse_line(data: &str) -> Option<String> {
        if data == "[DONE]" {
            return None;
        }
        let v: Value = serde_json::from_str(data).ok()?;
        let delta = v["choices"][0]["delta"]["content"].as_str()?;
        if delta.is_empty() {
            None
        } else {
            Some(delta.to_string())
        }
    }
}

#[async_trait]
impl ProviderEngine for OpenAiCompatibleProvider {
    async fn generate(&self, prompt: &str, context: &[ChatMessage]) -> String {
        let messages = self.format_messages(context, prompt);
        match self.chat_completion(&messages).await {
            Ok(text) => text,
            Err(e) => format!("[Error] {}: {e}", self.name),
        }
    }

    async fn stream(&self, prompt: &str, context: &[ChatMessage]) -> BoxStream<'static, String> {
        let messages = self.format_messages(context, prompt);
        let resp = self.request(reqwest::Method::POST, "/v1/chat/completions").json(&self.body(&messages, true)).send().await;

        let name = self.name.clone();
        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                return stream::once(async move { format!("[Error] {name} status {status}") }).boxed();
            }
            Err(e) => return stream::once(async move { format!("[Error] {name}: {e}") }).boxed(),
        };

        let mut byte_stream = resp.bytes_stream();
        let out = async_stream::stream! {
            let mut buffer = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    match OpenAiCompatibleProvider::parse_sse_line(data) {
                        Some(delta) => yield delta,
                        None if data == "[DONE]" => return,
                        None => continue,
                    }
                }
            }
        };
        out.boxed()
    }

    async fn is_available(&self) -> bool {
        match self.request(reqwest::Method::GET, "/v1/models").timeout(Duration::from_secs(10)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("[providers] {} availability probe failed: {e}", self.name);
                false
            }
        }
    }

    fn get_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_line_skips_done_sentinel() {
        assert_eq!(OpenAiCompatibleProvider::parse_sse_line("[DONE]"), None);
    }

    #[test]
    fn parse_sse_line_extracts_delta_content() {
        let line = r#"{"choices":[{"delta":{"content":"hi"}}]}"#;
        assert_eq!(OpenAiCompatibleProvider::parse_sse_line(line), Some("hi".to_string()));
    }

    #[test]
    fn parse_sse_line_skips_empty_delta() {
        let line = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(OpenAiCompatibleProvider::parse_sse_line(line), None);
    }
}
