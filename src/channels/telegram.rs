//! Telegram channel — Bot API client and long-poll loop.
//!
//! Sends and edits messages, uploads documents, downloads photos, and feeds
//! `getUpdates` results into an [`UpdateStream`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::channels::telegram_types::{ApiResponse, SentMessage, TgFile, Update};
use crate::channels::{Messenger, UpdateStream, update_stream};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel — talks to the Bot API over HTTPS.
#[derive(Clone)]
pub struct TelegramChannel {
    bot_token: SecretString,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, api_base: impl Into<String>) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            bot_token,
            api_base,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{file_path}",
            self.api_base,
            self.bot_token.expose_secret()
        )
    }

    /// Decode a Bot API envelope, turning `ok: false` into an error.
    async fn read_result<T: DeserializeOwned>(
        method: &str,
        resp: reqwest::Response,
    ) -> Result<T, ChannelError> {
        let status = resp.status();
        let envelope: ApiResponse<T> = resp.json().await.map_err(|e| ChannelError::Api {
            method: method.into(),
            reason: format!("unreadable response ({status}): {e}"),
        })?;

        match envelope.result {
            Some(result) if envelope.ok => Ok(result),
            _ => Err(ChannelError::Api {
                method: method.into(),
                reason: envelope
                    .description
                    .unwrap_or_else(|| format!("HTTP {status}")),
            }),
        }
    }

    /// Send a single message chunk (≤4096 chars), HTML first with plain
    /// text fallback.
    async fn send_message_chunk(&self, chat_id: i64, text: &str) -> Result<i64, ChannelError> {
        let html_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML"
        });

        let html_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&html_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        let html_status = html_resp.status();
        if html_status.is_success() {
            let sent: SentMessage = Self::read_result("sendMessage", html_resp).await?;
            return Ok(sent.message_id);
        }

        let html_err = html_resp.text().await.unwrap_or_default();
        tracing::warn!(
            status = ?html_status,
            error = %html_err,
            "Telegram sendMessage with HTML failed; retrying without parse_mode"
        );

        let plain_body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let plain_resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&plain_body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !plain_resp.status().is_success() {
            let plain_err = plain_resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!(
                    "sendMessage failed (html: {} {}, plain: {})",
                    html_status, html_err, plain_err
                ),
            });
        }

        let sent: SentMessage = Self::read_result("sendMessage", plain_resp).await?;
        Ok(sent.message_id)
    }

    /// One `getUpdates` call starting at `offset`.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, ChannelError> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let resp = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .send()
            .await?;

        Self::read_result("getUpdates", resp).await
    }

    /// Spawn the long-poll loop and return the stream it feeds.
    pub fn start_polling(&self) -> UpdateStream {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let channel = self.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for updates...");

            loop {
                let updates = match channel.get_updates(offset).await {
                    Ok(u) => u,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                for update in updates {
                    offset = next_offset(offset, update.update_id);
                    if tx.send(update).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        update_stream(rx)
    }

    /// Verify the token with `getMe`.
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
}

#[async_trait]
impl Messenger for TelegramChannel {
    /// Splits long messages that exceed Telegram's 4096 char limit.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChannelError> {
        let mut last_id = 0;
        for chunk in split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH) {
            last_id = self.send_message_chunk(chat_id, &chunk).await?;
        }
        Ok(last_id)
    }

    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML"
        });

        let resp = self
            .client
            .post(self.api_url("editMessageText"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Api {
                method: "editMessageText".into(),
                reason: err,
            });
        }
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), ChannelError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document.pdf");

        let file_bytes = tokio::fs::read(path).await?;
        let part = Part::bytes(file_bytes).file_name(file_name.to_string());

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .part("document", part);

        if let Some(cap) = caption {
            form = form.text("caption", cap.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("sendDocument"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::Api {
                method: "sendDocument".into(),
                reason: err,
            });
        }

        tracing::info!("Telegram document sent to {chat_id}: {file_name}");
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChannelError> {
        let resp = self
            .client
            .post(self.api_url("getFile"))
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;
        let file: TgFile = Self::read_result("getFile", resp).await?;

        let remote_path = file.file_path.ok_or_else(|| ChannelError::DownloadFailed {
            file_id: file_id.into(),
            reason: "getFile returned no file_path".into(),
        })?;

        let resp = self.client.get(self.file_url(&remote_path)).send().await?;
        if !resp.status().is_success() {
            return Err(ChannelError::DownloadFailed {
                file_id: file_id.into(),
                reason: format!("download returned {}", resp.status()),
            });
        }

        let bytes = resp.bytes().await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;

        tracing::debug!(file_id, path = %dest.display(), size = bytes.len(), "Telegram file downloaded");
        Ok(bytes.len() as u64)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Cursor for the next `getUpdates` call. Never moves backwards.
fn next_offset(current: i64, update_id: i64) -> i64 {
    current.max(update_id + 1)
}

/// Split a message into chunks that fit Telegram's character limit.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.chars().count() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.chars().count() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        // Byte index of the max_len-th char keeps the cut on a char boundary.
        let hard_cut = remaining
            .char_indices()
            .nth(max_len)
            .map_or(remaining.len(), |(i, _)| i);

        let chunk = &remaining[..hard_cut];
        let split_at = chunk
            .rfind('\n')
            .or_else(|| chunk.rfind(' '))
            .unwrap_or(hard_cut);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { hard_cut } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
