//! Chat channel: Telegram Bot API over HTTPS.
//!
//! Updates are fetched with `getUpdates` long polling and acknowledged by
//! advancing the offset past the highest `update_id` seen.  Replies and
//! broadcasts go out with `sendMessage` in Markdown.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub text: String,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Fetch messages received since the previous poll.
    async fn poll(&mut self) -> Result<Vec<IncomingMessage>>;

    async fn send(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Send `text` to every chat, logging and dropping failures.
pub async fn broadcast(chat: &dyn ChatTransport, chat_ids: &[i64], text: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = chat.send(chat_id, text).await {
            warn!(chat_id, error = %format!("{e:#}"), "chat: delivery failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Bot API wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    chat: Chat,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
}

impl<T> ApiResponse<T> {
    fn into_result(self, method: &str) -> Result<Option<T>> {
        if !self.ok {
            bail!(
                "{method}: {}",
                self.description.as_deref().unwrap_or("request rejected")
            );
        }
        Ok(self.result)
    }
}

/// Text messages from a batch of updates, plus the offset for the next
/// poll.  Non-text updates still advance the offset.
fn unpack(updates: Vec<Update>, offset: i64) -> (Vec<IncomingMessage>, i64) {
    let mut next = offset;
    let mut messages = Vec::new();
    for update in updates {
        next = next.max(update.update_id + 1);
        if let Some(Message {
            chat,
            text: Some(text),
        }) = update.message
        {
            messages.push(IncomingMessage {
                chat_id: chat.id,
                text,
            });
        }
    }
    (messages, next)
}

// ---------------------------------------------------------------------------
// Telegram client
// ---------------------------------------------------------------------------

pub struct Telegram {
    http: reqwest::Client,
    base_url: String,
    offset: i64,
    poll_timeout_sec: u64,
}

impl Telegram {
    pub fn new(
        api_base: &str,
        token: &str,
        poll_timeout_sec: u64,
        request_timeout_sec: u64,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(poll_timeout_sec + request_timeout_sec))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: format!("{}/bot{token}", api_base.trim_end_matches('/')),
            offset: 0,
            poll_timeout_sec,
        })
    }
}

#[async_trait]
impl ChatTransport for Telegram {
    async fn poll(&mut self) -> Result<Vec<IncomingMessage>> {
        let url = format!("{}/getUpdates", self.base_url);
        let response: ApiResponse<Vec<Update>> = self
            .http
            .get(&url)
            .query(&[
                ("offset", self.offset.to_string()),
                ("timeout", self.poll_timeout_sec.to_string()),
            ])
            .send()
            .await
            .context("getUpdates request failed")?
            .json()
            .await
            .context("getUpdates returned malformed JSON")?;

        let updates = response.into_result("getUpdates")?.unwrap_or_default();
        let (messages, next) = unpack(updates, self.offset);
        if next != self.offset {
            debug!(offset = next, received = messages.len(), "chat: updates acknowledged");
        }
        self.offset = next;
        Ok(messages)
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        let url = format!("{}/sendMessage", self.base_url);
        let body = SendMessage {
            chat_id,
            text,
            parse_mode: "Markdown",
        };
        let response: ApiResponse<serde_json::Value> = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("sendMessage request failed")?
            .json()
            .await
            .context("sendMessage returned malformed JSON")?;
        response.into_result("sendMessage")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Scripted inbox plus a log of everything sent.
    #[derive(Default)]
    pub(crate) struct FakeChat {
        pub(crate) inbox: VecDeque<Vec<IncomingMessage>>,
        pub(crate) sent: Arc<Mutex<Vec<(i64, String)>>>,
        pub(crate) fail_sends: bool,
        pub(crate) fail_polls: bool,
    }

    impl FakeChat {
        pub(crate) fn deliver(&mut self, chat_id: i64, text: &str) {
            self.inbox.push_back(vec![IncomingMessage {
                chat_id,
                text: text.to_string(),
            }]);
        }
    }

    #[async_trait]
    impl ChatTransport for FakeChat {
        async fn poll(&mut self) -> Result<Vec<IncomingMessage>> {
            if self.fail_polls {
                bail!("network down");
            }
            Ok(self.inbox.pop_front().unwrap_or_default())
        }

        async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
            if self.fail_sends {
                bail!("network down");
            }
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    // -- Wire parsing -----------------------------------------------------------

    const UPDATES: &str = r#"{
        "ok": true,
        "result": [
            {"update_id": 100, "message": {"message_id": 1, "chat": {"id": 42, "type": "private"}, "text": "/status"}},
            {"update_id": 101, "message": {"message_id": 2, "chat": {"id": 42, "type": "private"}, "sticker": {}}},
            {"update_id": 102, "edited_message": {"message_id": 1, "chat": {"id": 42}, "text": "/tank"}},
            {"update_id": 103, "message": {"message_id": 3, "chat": {"id": -1001, "type": "group"}, "text": "/tank@water_bot"}}
        ]
    }"#;

    #[test]
    fn unpack_keeps_text_messages_and_advances_offset() {
        let resp: ApiResponse<Vec<Update>> = serde_json::from_str(UPDATES).unwrap();
        let updates = resp.into_result("getUpdates").unwrap().unwrap();
        let (messages, next) = unpack(updates, 0);

        assert_eq!(next, 104);
        assert_eq!(
            messages,
            vec![
                IncomingMessage {
                    chat_id: 42,
                    text: "/status".into()
                },
                IncomingMessage {
                    chat_id: -1001,
                    text: "/tank@water_bot".into()
                },
            ]
        );
    }

    #[test]
    fn unpack_empty_batch_keeps_offset() {
        let (messages, next) = unpack(vec![], 57);
        assert!(messages.is_empty());
        assert_eq!(next, 57);
    }

    #[test]
    fn api_error_is_reported() {
        let resp: ApiResponse<Vec<Update>> =
            serde_json::from_str(r#"{"ok": false, "error_code": 401, "description": "Unauthorized"}"#)
                .unwrap();
        let err = resp.into_result("getUpdates").unwrap_err();
        assert_eq!(err.to_string(), "getUpdates: Unauthorized");
    }

    #[test]
    fn send_message_body() {
        let body = SendMessage {
            chat_id: 42,
            text: "Pump ON",
            parse_mode: "Markdown",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["chat_id"], 42);
        assert_eq!(json["text"], "Pump ON");
        assert_eq!(json["parse_mode"], "Markdown");
    }

    #[test]
    fn base_url_trims_trailing_slash() {
        let tg = Telegram::new("https://api.telegram.org/", "123:abc", 1, 5).unwrap();
        assert_eq!(tg.base_url, "https://api.telegram.org/bot123:abc");
    }

    // -- broadcast ----------------------------------------------------------------

    #[tokio::test]
    async fn broadcast_reaches_every_chat() {
        let chat = FakeChat::default();
        broadcast(&chat, &[1, 2], "hi").await;
        assert_eq!(
            *chat.sent.lock().unwrap(),
            vec![(1, "hi".to_string()), (2, "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn broadcast_survives_failures() {
        let chat = FakeChat {
            fail_sends: true,
            ..Default::default()
        };
        broadcast(&chat, &[1, 2], "hi").await;
        assert!(chat.sent.lock().unwrap().is_empty());
    }
}
