//! JV Report — Telegram photo intake, PDF assembly and email delivery.

pub mod channels;
pub mod config;
pub mod error;
pub mod intake;
pub mod media;
pub mod pipeline;
pub mod session;
pub mod submission_log;

pub use config::BotConfig;
pub use intake::{IntakeGate, IntakeOutcome};
pub use pipeline::{CompletionPipeline, PipelineReport};
