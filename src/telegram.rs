//! Telegram channel — long-polls the Bot API for updates.
//!
//! Parses updates into typed [`Event`]s for the dispatcher and implements
//! the outbound [`BotTransport`] side: text replies with markup, callback
//! acknowledgement, and photo file resolution.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::bot::controller::{CallbackAction, ContactInfo, Reply, ReplyMarkup};
use crate::bot::dispatcher::{BotTransport, Dispatcher, Event, EventKind, EventMeta};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Back-off after a failed poll.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{file_path}",
            self.bot_token
        )
    }

    /// Verify the token against `getMe`.
    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    /// Poll `getUpdates` forever, feeding parsed events to the dispatcher.
    /// Only returns on unrecoverable startup failure.
    pub async fn run(&self, dispatcher: Arc<Dispatcher>) -> Result<(), ChannelError> {
        self.health_check().await?;
        info!("Telegram channel listening for updates...");

        let mut offset: i64 = 0;

        loop {
            let body = serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            });

            let resp = match self
                .client
                .post(self.api_url("getUpdates"))
                .json(&body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!("Telegram poll error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            let data: serde_json::Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    warn!("Telegram parse error: {e}");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            if let Some(results) = data.get("result").and_then(serde_json::Value::as_array) {
                for update in results {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    if let Some(event) = parse_update(update) {
                        dispatcher.dispatch(event).await;
                    }
                }
            }
        }
    }

    /// Send a single message chunk (≤4096 chars) with optional reply markup.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        markup: ReplyMarkup,
    ) -> Result<(), ChannelError> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(markup_json) = markup_json(markup) {
            body["reply_markup"] = markup_json;
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage failed ({status}: {err})"),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl BotTransport for TelegramChannel {
    async fn send_reply(&self, chat_id: &str, reply: &Reply) -> Result<(), ChannelError> {
        let chunks = split_message(&reply.text, TELEGRAM_MAX_MESSAGE_LENGTH);
        // The markup rides on the last chunk so it lands under the full text.
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.iter().enumerate() {
            let markup = if i == last {
                reply.markup
            } else {
                ReplyMarkup::None
            };
            self.send_message_chunk(chat_id, chunk, markup).await?;
        }
        Ok(())
    }

    async fn ack_callback(&self, callback_id: &str) {
        let body = serde_json::json!({ "callback_query_id": callback_id });
        if let Err(e) = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await
        {
            warn!("Telegram answerCallbackQuery failed: {e}");
        }
    }

    async fn photo_url(&self, file_id: &str) -> Option<String> {
        let body = serde_json::json!({ "file_id": file_id });
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&body)
            .send()
            .await
            .inspect_err(|e| warn!("Telegram getFile failed: {e}"))
            .ok()?;

        let data: serde_json::Value = resp
            .json()
            .await
            .inspect_err(|e| warn!("Telegram getFile parse failed: {e}"))
            .ok()?;

        let file_path = data
            .get("result")
            .and_then(|r| r.get("file_path"))
            .and_then(serde_json::Value::as_str)?;

        Some(self.file_url(file_path))
    }
}

// ── Update parsing ──────────────────────────────────────────────────

/// Parse one Bot API update into an [`Event`]. Updates the bot does not
/// react to (stickers, edits, group service messages) yield `None`.
fn parse_update(update: &serde_json::Value) -> Option<Event> {
    if let Some(callback) = update.get("callback_query") {
        return parse_callback(callback);
    }

    let message = update.get("message")?;
    let from = message.get("from")?;
    let identity = from.get("id").and_then(serde_json::Value::as_i64)?.to_string();
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?
        .to_string();

    let meta = EventMeta {
        chat_id,
        callback_id: None,
        contact: ContactInfo {
            username: json_str(from, "username"),
            first_name: json_str(from, "first_name"),
            last_name: json_str(from, "last_name"),
        },
    };

    let kind = if let Some(text) = message.get("text").and_then(serde_json::Value::as_str) {
        parse_text(text)
    } else if let Some(photos) = message.get("photo").and_then(serde_json::Value::as_array) {
        // Telegram sends several sizes; the last one is the largest.
        let file_id = photos
            .last()
            .and_then(|p| p.get("file_id"))
            .and_then(serde_json::Value::as_str)?;
        EventKind::Photo {
            file_id: file_id.to_string(),
        }
    } else {
        return None;
    };

    Some(Event {
        identity,
        kind,
        meta,
    })
}

fn parse_text(text: &str) -> EventKind {
    // Commands may carry a @botname suffix in groups.
    let command = text.trim().split_whitespace().next().unwrap_or("");
    let command = command.split('@').next().unwrap_or("");
    match command {
        "/start" => EventKind::Start,
        "/help" => EventKind::Help,
        "/balance" => EventKind::Balance,
        "/changecode" => EventKind::ChangeCode,
        _ => EventKind::Text(text.to_string()),
    }
}

fn parse_callback(callback: &serde_json::Value) -> Option<Event> {
    let identity = callback
        .get("from")
        .and_then(|f| f.get("id"))
        .and_then(serde_json::Value::as_i64)?
        .to_string();
    let chat_id = callback
        .get("message")
        .and_then(|m| m.get("chat"))
        .and_then(|c| c.get("id"))
        .and_then(serde_json::Value::as_i64)?
        .to_string();
    let callback_id = callback
        .get("id")
        .and_then(serde_json::Value::as_str)?
        .to_string();

    let action = match callback.get("data").and_then(serde_json::Value::as_str)? {
        "check_balance" => CallbackAction::CheckBalance,
        "change_code" => CallbackAction::ChangeCode,
        other => {
            warn!(data = other, "Unknown callback action");
            return None;
        }
    };

    Some(Event {
        identity,
        kind: EventKind::Callback(action),
        meta: EventMeta {
            chat_id,
            callback_id: Some(callback_id),
            contact: ContactInfo::default(),
        },
    })
}

fn json_str(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(String::from)
}

/// Reply markup as Bot API JSON, or `None` for plain messages.
fn markup_json(markup: ReplyMarkup) -> Option<serde_json::Value> {
    match markup {
        ReplyMarkup::None => None,
        ReplyMarkup::MainMenu => Some(serde_json::json!({
            "inline_keyboard": [
                [{ "text": "💰 Check balance", "callback_data": "check_balance" }],
                [{ "text": "🔄 Change code", "callback_data": "change_code" }],
            ]
        })),
        ReplyMarkup::PhotoKeyboard => Some(serde_json::json!({
            "keyboard": [[{ "text": "📷 Send photo" }]],
            "resize_keyboard": true,
        })),
        ReplyMarkup::RemoveKeyboard => Some(serde_json::json!({
            "remove_keyboard": true,
        })),
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Walk the cut back onto a char boundary before slicing.
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }

        let chunk = &remaining[..cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
