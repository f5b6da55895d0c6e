// Messaging Channel — send a message, and perform a bounded-wait poll for a
// yes/no reply. Default transport is a bot-style HTTP channel shaped like
// the Telegram Bot API (`sendMessage` / `getUpdates`), matching this
// codebase's primary delivery bridge. Behind a trait so Sandbox and Daemon
// tests can swap in an in-memory double.

use crate::error::EngineResult;
use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use std::time::Duration;

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> bool;

    /// Send, then poll for a reply whose trimmed, lowercased text is
    /// "yes" or "no". Returns `Ok(None)` on timeout, `Err` on transport
    /// failure — both are treated as denial by callers.
    async fn send_and_await_reply(
        &self,
        recipient: &str,
        text: &str,
        timeout_seconds: u64,
    ) -> EngineResult<Option<String>>;
}

/// Bot-API-shaped HTTP channel: `POST {base}/sendMessage`, `GET
/// {base}/getUpdates?offset=`.
pub struct HttpChannel {
    client: reqwest::Client,
    base_url: String,
}

impl HttpChannel {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<IncomingMessage>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    from: Option<ChatRef>,
    chat: Option<ChatRef>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatRef {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    username: Option<String>,
}

#[async_trait]
impl Channel for HttpChannel {
    async fn send(&self, recipient: &str, text: &str) -> bool {
        let url = format!("{}/sendMessage", self.base_url);
        let body = serde_json::json!({ "chat_id": recipient, "text": text, "parse_mode": "Markdown" });
        match self.client.post(&url).json(&body).send().await {
            Ok(resp) => {
                let ok = resp.status().is_success();
                if !ok {
                    warn!("[channel] send to {recipient} failed with status {}", resp.status());
                }
                ok
            }
            Err(e) => {
                warn!("[channel] send to {recipient} failed: {e}");
                false
            }
        }
    }

    async fn send_and_await_reply(
        &self,
        recipient: &str,
        text: &str,
        timeout_seconds: u64,
    ) -> EngineResult<Option<String>> {
        if !self.send(recipient, text).await {
            return Err(crate::error::EngineError::channel("http", "send failed"));
        }

        let mut offset: i64 = self.highest_update_id().await.unwrap_or(0) + 1;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_seconds);

        while tokio::time::Instant::now() < deadline {
            let url = format!("{}/getUpdates?offset={offset}&timeout=1", self.base_url);
            match self.client.get(&url).send().await {
                Ok(resp) => {
                    if let Ok(parsed) = resp.json::<UpdatesResponse>().await {
                        for update in &parsed.result {
                            offset = offset.max(update.update_id + 1);
                            if let Some(msg) = &update.message {
                                let from_matches = msg
                                    .from
                                    .as_ref()
                                    .or(msg.chat.as_ref())
                                    .map(|r| chat_ref_matches(r, recipient))
                                    .unwrap_or(false);
                                if !from_matches {
                                    continue;
                                }
                                if let Some(text) = &msg.text {
                                    let normalized = text.trim().to_lowercase();
                                    if normalized == "yes" || normalized == "no" {
                                        self.acknowledge(offset).await;
                                        return Ok(Some(normalized));
                                    }
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("[channel] poll failed: {e}");
                }
            }
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }

        info!("[channel] send_and_await_reply timed out after {timeout_seconds}s");
        Ok(None)
    }
}

impl HttpChannel {
    async fn highest_update_id(&self) -> Option<i64> {
        let url = format!("{}/getUpdates?offset=-1", self.base_url);
        let resp = self.client.get(&url).send().await.ok()?;
        let parsed = resp.json::<UpdatesResponse>().await.ok()?;
        parsed.result.last().map(|u| u.update_id)
    }

    async fn acknowledge(&self, next_offset: i64) {
        let url = format!("{}/getUpdates?offset={next_offset}", self.base_url);
        let _ = self.client.get(&url).send().await;
    }
}

fn chat_ref_matches(chat: &ChatRef, recipient: &str) -> bool {
    if let Some(username) = &chat.username {
        if username == recipient {
            return true;
        }
    }
    chat.id.as_str().map(|s| s == recipient).unwrap_or(false)
        || chat.id.as_i64().map(|n| n.to_string() == recipient).unwrap_or(false)
}

/// In-memory double used by unit and integration tests so Sandbox/Daemon
/// logic can be exercised without a network round-trip. Not behind
/// `#[cfg(test)]` so the `scenarios` integration test binary can use it too.
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    pub struct FakeChannel {
        pub sent: Mutex<Vec<(String, String)>>,
        replies: Mutex<VecDeque<String>>,
    }

    impl FakeChannel {
        pub fn new() -> Self {
            Self { sent: Mutex::new(Vec::new()), replies: Mutex::new(VecDeque::new()) }
        }

        pub fn enqueue_reply(&self, text: &str) {
            self.replies.lock().push_back(text.to_string());
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        async fn send(&self, recipient: &str, text: &str) -> bool {
            self.sent.lock().push((recipient.to_string(), text.to_string()));
            true
        }

        async fn send_and_await_reply(
            &self,
            recipient: &str,
            text: &str,
            timeout_seconds: u64,
        ) -> EngineResult<Option<String>> {
            self.send(recipient, text).await;
            if let Some(reply) = self.replies.lock().pop_front() {
                let normalized = reply.trim().to_lowercase();
                return Ok(Some(normalized));
            }
            tokio::time::sleep(Duration::from_millis(timeout_seconds.min(1) * 50)).await;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeChannel;
    use super::*;

    #[tokio::test]
    async fn fake_channel_records_sends() {
        let channel = FakeChannel::new();
        assert!(channel.send("owner", "hi").await);
        assert_eq!(channel.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn fake_channel_returns_enqueued_reply() {
        let channel = FakeChannel::new();
        channel.enqueue_reply("Yes");
        let reply = channel.send_and_await_reply("owner", "confirm?", 5).await.unwrap();
        assert_eq!(reply.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn fake_channel_times_out_without_reply() {
        let channel = FakeChannel::new();
        let reply = channel.send_and_await_reply("owner", "confirm?", 1).await.unwrap();
        assert!(reply.is_none());
    }
}
