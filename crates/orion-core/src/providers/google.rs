// Gemini provider. OAuth mode talks REST directly to
// `generateContent`/`streamGenerateContent?alt=sse`; role mapping is
// user -> user, assistant -> model, system hoisted to `system_instruction`.

use super::{is_retryable_status, retry_delay, ChatMessage, ChatRole, ProviderEngine, MAX_RETRIES};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

const DEFAULT_MODEL: &str = "orion-multimodal-large";
const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiProvider {
    client: Client,
    credential: String,
    model: String,
}

impl GeminiProvider {
    /// `credential` is either `Bearer <token>` (OAuth) or a bare API key.
    pub fn new(credential: impl Into<String>) -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
            credential: credential.into(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    fn gemini_role(role: ChatRole) -> &'static str {
        match role {
            ChatRole::Assistant => "model",
            _ => "user",
        }
    }

    fn body(&self, messages: &[ChatMessage]) -> Value {
        let system_instruction: String = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.clone())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| json!({"role": Self::gemini_role(m.role), "parts": [{"text": m.content}]}))
            .collect();

        let mut body = json!({ "contents": contents });
        if !system_instruction.is_empty() {
            body["system_instruction"] = json!({ "parts": [{"text": system_instruction}] });
        }
        body
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{BASE_URL}/models/{}:{path}", self.model);
        let builder = self.client.post(&url);
        if let Some(token) = self.credential.strip_prefix("Bearer ") {
            builder.bearer_auth(token)
        } else {
            builder.query(&[("key", &self.credential)])
        }
    }

    async fn generate_content(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let mut attempt = 0;
        loop {
            let resp = self.request("generateContent").json(&self.body(messages)).send().await;
            match resp {
                Ok(resp) if resp.status().is_success() => {
                    let v: Value = resp.json().await.map_err(|e| e.to_string())?;
                    return Ok(v["candidates"][0]["content"]["parts"][0]["text"].as_str().unwrap_or_default().to_string());
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

    fn parse_sse_line(data: &str) -> Option<String> {
        let v: Value = serde_json::from_str(data).ok()?;
        let text = v["candidates"][0]["content"]["parts"][0]["text"].as_str()?;
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}

#[async_trait]
impl ProviderEngine for GeminiProvider {
    async fn generate(&self, prompt: &str, context: &[ChatMessage]) -> String {
        let messages = self.format_messages(context, prompt);
        match self.generate_content(&messages).await {
            Ok(text) => text,
            Err(e) => format!("[Error] gemini: {e}"),
        }
    }

    async fn stream(&self, prompt: &str, context: &[ChatMessage]) -> BoxStream<'static, String> {
        let messages = self.format_messages(context, prompt);
        let resp = self.request("streamGenerateContent?alt=sse").json(&self.body(&messages)).send().await;

        let resp = match resp {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                let status = resp.status();
                return stream::once(async move { format!("[Error] gemini status {status}") }).boxed();
            }
            Err(e) => return stream::once(async move { format!("[Error] gemini: {e}") }).boxed(),
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
                    if let Some(delta) = GeminiProvider::parse_sse_line(data) {
                        yield delta;
                    }
                }
            }
        };
        out.boxed()
    }

    async fn is_available(&self) -> bool {
        let url = format!("{BASE_URL}/models");
        let builder = self.client.get(&url).timeout(Duration::from_secs(10));
        let builder = if let Some(token) = self.credential.strip_prefix("Bearer ") {
            builder.bearer_auth(token)
        } else {
            builder.query(&[("key", &self.credential)])
        };
        match builder.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    fn get_name(&self) -> &str {
        "gemini"
    }
}
