//! Telegram Bot API wire types and the inbound event they reduce to.

use serde::{Deserialize, Serialize};

/// Envelope every Bot API method answers with.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
}

/// One incoming update, as delivered by `getUpdates` or a webhook POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// One resolution variant of a sent photo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

/// Result of `getFile`.
#[derive(Debug, Clone, Deserialize)]
pub struct TgFile {
    #[serde(default)]
    pub file_path: Option<String>,
}

/// Result of `sendMessage` (only the field we use).
#[derive(Debug, Clone, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

/// What the intake gate cares about in an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Photo, already narrowed to its largest variant.
    Photo { file_id: String },
    Text(String),
    /// Stickers, documents, voice notes and so on.
    Unsupported,
}

impl Update {
    /// Reduce to an inbound event. `None` for non-message updates.
    pub fn into_event(self) -> Option<InboundEvent> {
        let message = self.message?;
        let payload = if let Some(best) = message.photo.as_deref().and_then(largest_photo) {
            Payload::Photo {
                file_id: best.file_id.clone(),
            }
        } else if let Some(text) = message.text {
            Payload::Text(text)
        } else {
            Payload::Unsupported
        };
        Some(InboundEvent {
            chat_id: message.chat.id,
            payload,
        })
    }
}

/// Pick the variant with the most pixels. Ties go to the later entry,
/// since Telegram lists sizes smallest first.
pub fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}
