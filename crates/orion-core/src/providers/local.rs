// Local (Ollama) provider — the only engine without API-key auth.
// Speaks Ollama's own `/api/chat` surface, not the OpenAI-compatible
// one: requests and streamed chunks are both plain JSON, one object
// per line, not SSE `data:` frames.

use super::{ChatMessage, ProviderEngine};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use log::warn;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct LocalProvider {
    client: Client,
    base_url: String,
    model: String,
}

impl LocalProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        json!({
            "model": self.model,
            "stream": stream,
            "messages": messages.iter().map(|m| json!({"role": m.role.as_str(), "content": m.content})).collect::<Vec<_>>(),
        })
    }

    /// Parses one newline-delimited JSON chunk from `/api/chat`,
    /// returning the content delta if present.
    fn parse_line(line: &str) -> Option<String> {
        let v: Value = serde_json::from_str(line).ok()?;
        let content = v["message"]["content"].as_str()?;
        if content.is_empty() {
            None
        } else {
            Some(content.to_string())
        }
    }
}

#[async_trait]
impl ProviderEngine for LocalProvider {
    async fn generate(&self, prompt: &str, context: &[ChatMessage]) -> String {
        if !self.is_available().await {
            return "[Error] Local engine unavailable: Ollama not running".to_string();
        }

        let messages = self.format_messages(context, prompt);
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&self.body(&messages, false))
            .send()
            .await;

        match resp {
            Ok(resp) if resp.status().is_success() => match resp.json::<Value>().await {
                Ok(v) => v["message"]["content"].as_str().unwrap_or_default().to_string(),
                Err(e) => format!("[Error] local: {e}"),
            },
            Ok(resp) => format!("[Error] local status {}", resp.status()),
            Err(e) => format!("[Error] local: {e}"),
        }
    }

    async fn stream(&self, prompt: &str, context: &[ChatMessage]) -> BoxStream<'static, String> {
        if !self.is_available().await {
            return stream::once(async { "[Error] Local engine unavailable: Ollama not running".to_string() }).boxed();
        }

        let messages = self.format_messages(context, prompt);
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&self.body(&messages, true))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                return stream::once(async move { format!("[Error] local status {status}") }).boxed();
            }
            Err(e) => return stream::once(async move { format!("[Error] local: {e}") }).boxed(),
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
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(delta) = LocalProvider::parse_line(&line) {
                        yield delta;
                    }
                }
            }
        };
        out.boxed()
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url.trim_end_matches('/')))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!("[providers] local availability probe failed: {e}");
                false
            }
        }
    }

    fn get_name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_extracts_message_content() {
        let line = r#"{"message":{"role":"assistant","content":"hi"}}"#;
        assert_eq!(LocalProvider::parse_line(line), Some("hi".to_string()));
    }

    #[test]
    fn parse_line_skips_empty_content() {
        let line = r#"{"message":{"role":"assistant","content":""}}"#;
        assert_eq!(LocalProvider::parse_line(line), None);
    }

    #[test]
    fn parse_line_ignores_malformed_json() {
        assert_eq!(LocalProvider::parse_line("not json"), None);
    }
}
