//! Channel abstraction for message I/O.

pub mod email;
pub mod telegram;
pub mod telegram_types;
pub mod webhook;

use std::path::Path;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;

pub use email::{Mailer, OutgoingMail, SmtpMailer};
pub use telegram::TelegramChannel;
pub use telegram_types::{InboundEvent, Payload, Update};

/// Stream of raw updates, fed by the poll loop or the webhook.
pub type UpdateStream = Pin<Box<dyn Stream<Item = Update> + Send>>;

/// Turn an update receiver into an [`UpdateStream`].
pub fn update_stream(rx: tokio::sync::mpsc::UnboundedReceiver<Update>) -> UpdateStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|update| (update, rx))
    }))
}

/// Outbound operations the intake gate and pipeline need from the chat
/// transport.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Send a text message, returning the id of the (last) message sent.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChannelError>;

    /// Replace the text of an earlier message.
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ChannelError>;

    /// Upload a file as a document.
    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        caption: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Fetch a file by its Bot API id and write it to `dest`.
    /// Returns the number of bytes written.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChannelError>;
}
