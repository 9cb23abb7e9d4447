//! Thin Bot API adapter: long-poll intake and outbound sends. The rest of
//! the core talks to the platform only through `UpdateSource` and
//! `ChatSender`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::telegram::Update;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    MarkdownV2,
    Plain,
}

impl ParseMode {
    fn as_str(&self) -> Option<&'static str> {
        match self {
            ParseMode::Markdown => Some("Markdown"),
            ParseMode::MarkdownV2 => Some("MarkdownV2"),
            ParseMode::Plain => None,
        }
    }
}

#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Long-polls for the next batch of updates after `offset`.
    async fn next_updates(&self, offset: i64) -> CoreResult<Vec<Update>>;
}

#[async_trait]
pub trait ChatSender: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str, mode: ParseMode) -> CoreResult<()>;
    async fn send_typing(&self, chat_id: i64);
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

pub struct BotApi {
    http: reqwest::Client,
    base_url: String,
    poll_timeout_secs: u64,
}

impl BotApi {
    pub fn new(token: &str) -> CoreResult<Self> {
        let http = reqwest::Client::builder()
            // Long poll plus headroom for the response itself.
            .timeout(Duration::from_secs(70))
            .build()
            .map_err(|e| CoreError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: format!("https://api.telegram.org/bot{token}"),
            poll_timeout_secs: 60,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> CoreResult<T> {
        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(CoreError::Transient(format!("{method} returned {status}")));
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| CoreError::Protocol(format!("{method}: malformed response: {e}")))?;

        if !body.ok {
            let description = body.description.unwrap_or_else(|| "unknown error".into());
            return Err(CoreError::Store(format!("{method} rejected: {description}")));
        }
        body.result
            .ok_or_else(|| CoreError::Protocol(format!("{method}: missing result")))
    }
}

fn map_send_error(e: reqwest::Error) -> CoreError {
    if e.is_timeout() || e.is_connect() {
        CoreError::Transient(format!("platform request failed: {e}"))
    } else {
        CoreError::Store(format!("platform request failed: {e}"))
    }
}

#[async_trait]
impl UpdateSource for BotApi {
    async fn next_updates(&self, offset: i64) -> CoreResult<Vec<Update>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": self.poll_timeout_secs,
                "allowed_updates": ["message"],
            }),
        )
        .await
    }
}

#[async_trait]
impl ChatSender for BotApi {
    async fn send(&self, chat_id: i64, text: &str, mode: ParseMode) -> CoreResult<()> {
        let mut payload = json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = mode.as_str() {
            payload["parse_mode"] = json!(mode);
        }
        let _: serde_json::Value = self.call("sendMessage", payload).await?;
        debug!(chat_id, length = text.chars().count(), "message sent");
        Ok(())
    }

    async fn send_typing(&self, chat_id: i64) {
        let result: CoreResult<serde_json::Value> = self
            .call(
                "sendChatAction",
                json!({ "chat_id": chat_id, "action": "typing" }),
            )
            .await;
        if let Err(e) = result {
            debug!(chat_id, error = %e, "typing action failed");
        }
    }
}
