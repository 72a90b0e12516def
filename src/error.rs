//! Error types for the JV report bot.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Messaging transport errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Bot API call {method} failed: {reason}")]
    Api { method: String, reason: String },

    #[error("File download failed for {file_id}: {reason}")]
    DownloadFailed { file_id: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// PDF assembly errors. Any of these aborts the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Refusing to build a document from an empty batch")]
    EmptyBatch,

    #[error("Cannot read image {path}: {reason}")]
    Image { path: PathBuf, reason: String },

    #[error("PDF encoding failed: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound mail errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("No recipients configured")]
    NoRecipients,

    #[error("Cannot read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("SMTP error: {0}")]
    Smtp(String),
}

/// Completion pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Document assembly failed: {0}")]
    Document(#[from] DocumentError),

    #[error("Email delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
