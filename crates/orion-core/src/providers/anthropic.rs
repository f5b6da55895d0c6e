// Anthropic provider — the system message is hoisted to the top-level
// `system` parameter; the `messages` array carries only user/assistant
// turns.

use super::{is_retryable_status, retry_delay, ChatMessage, ChatRole, ProviderEngine, MAX_RETRIES};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_MODEL: &str = "orion-reasoning-large";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let system = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        (if system.is_empty() { None } else { Some(system) }, turns)
    }

    fn body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        let (system, turns) = Self::split_system(messages);
        let mut body = json!({
            "model": self.model,
            "max_tokens": 4096,
            "stream": stream,
            "messages": turns,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        body
    }

    async fn create_message(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            let resp = self
                .client
                .post("https://api.anthropic.com/v1/messages")
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&self.body(messages, false))
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().is_success() => {
                    let v: Value = resp.json().await.map_err(|e| e.to_string())?;
                    return Ok(v["content"][0]["text"].as_str().unwrap_or_default().to_string());
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

    fn parse_sse_line(event: &str, data: &str) -> Option<String> {
        if event != "content_block_delta" {
            return None;
        }
        let v: Value = serde_json::from_str(data).ok()?;
        let delta = v["delta"]["text"].as_str()?;
        if delta.is_empty() {
            None
        } else {
            Some(delta.to_string())
        }
    }
}

#[async_trait]
impl ProviderEngine for AnthropicProvider {
    async fn generate(&self, prompt: &str, context: &[ChatMessage]) -> String {
        let messages = self.format_messages(context, prompt);
        match self.create_message(&messages).await {
            Ok(text) => text,
            Err(e) => format!("[Error] anthropic: {e}"),
        }
    }

    async fn stream(&self, prompt: &str, context: &[ChatMessage]) -> BoxStream<'static, String> {
        let messages = self.format_messages(context, prompt);
        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&self.body(&messages, true))
            .send()
            .await;

        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                return stream::once(async move { format!("[Error] anthropic status {status}") }).boxed();
            }
            Err(e) => return stream::once(async move { format!("[Error] anthropic: {e}") }).boxed(),
        };

        let mut byte_stream = resp.bytes_stream();
        let out = async_stream::stream! {
            let mut buffer = String::new();
            let mut current_event = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(chunk) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);
                    if let Some(event) = line.strip_prefix("event: ") {
                        current_event = event.to_string();
                    } else if let Some(data) = line.strip_prefix("data: ") {
                        if let Some(delta) = AnthropicProvider::parse_sse_line(&current_event, data) {
                            yield delta;
                        }
                    }
                }
            }
        };
        out.boxed()
    }

    async fn is_available(&self) -> bool {
        let body = json!({ "model": self.model, "max_tokens": 1, "messages": [{"role": "user", "content": "ping"}] });
        match self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            // A rate-limit response still means the credential and
            // endpoint are reachable.
            Ok(resp) => resp.status().is_success() || resp.status().as_u16() == 429,
            Err(_) => false,
        }
    }

    fn get_name(&self) -> &str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_system_hoists_system_and_keeps_turns() {
        let messages = vec![ChatMessage::system("persona"), ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("persona"));
        assert_eq!(turns.len(), 2);
    }

    #[test]
    fn parse_sse_line_ignores_non_delta_events() {
        assert_eq!(AnthropicProvider::parse_sse_line("ping", "{}"), None);
    }
}
