//! Configuration types.
//!
//! Everything is read from environment variables once at start-up. Required
//! values that are absent stop the process before any channel is opened.

use std::path::PathBuf;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Largest allowed width or height of a normalized photo, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 2048;

/// Photos larger than this on disk are re-encoded.
pub const MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;

/// JPEG quality used when re-encoding photos.
pub const JPEG_QUALITY: u8 = 85;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// How inbound updates reach the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Long-poll `getUpdates`.
    Polling,
    /// Telegram pushes updates to `POST /webhook`.
    Webhook,
}

impl std::str::FromStr for UpdateMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "polling" | "poll" => Ok(Self::Polling),
            "webhook" => Ok(Self::Webhook),
            other => Err(ConfigError::InvalidValue {
                key: "BOT_MODE".into(),
                message: format!("expected `polling` or `webhook`, got `{other}`"),
            }),
        }
    }
}

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// The only chat allowed to talk to the bot.
    pub authorized_chat_id: i64,
    pub api_base: String,
    pub mode: UpdateMode,
    /// Port for the webhook server.
    pub port: u16,
    /// Expected `X-Telegram-Bot-Api-Secret-Token` on webhook deliveries.
    pub webhook_secret: Option<SecretString>,
}

/// Outbound mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub sender: String,
    pub password: SecretString,
    pub recipients: Vec<String>,
    /// Closing lines appended to every mail body.
    pub signature: String,
}

/// Filesystem layout.
#[derive(Debug, Clone)]
pub struct Directories {
    pub downloads: PathBuf,
    pub pdfs: PathBuf,
    pub archive: PathBuf,
    pub submission_log: PathBuf,
    pub bot_log: PathBuf,
}

impl Directories {
    /// Create the download, PDF and archive directories.
    pub fn ensure(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.downloads)?;
        std::fs::create_dir_all(&self.pdfs)?;
        std::fs::create_dir_all(&self.archive)?;
        Ok(())
    }

    /// Layout rooted at `base`, used by tests and local runs.
    pub fn under(base: &std::path::Path) -> Self {
        Self {
            downloads: base.join("telegram_photos"),
            pdfs: base.join("pdfs"),
            archive: base.join("archive"),
            submission_log: base.join("submissions_log.txt"),
            bot_log: base.join("bot.log"),
        }
    }
}

/// Complete bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram: TelegramConfig,
    pub mail: MailConfig,
    pub dirs: Directories,
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String, ConfigError> {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };
        let optional = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let authorized_chat_id = parse_value::<i64>("YOUR_CHAT_ID", &required("YOUR_CHAT_ID")?)?;
        let sender = required("SENDER_EMAIL")?;
        let password = required("SENDER_PASSWORD")?;

        let port = match optional("PORT") {
            Some(raw) => parse_value::<u16>("PORT", &raw)?,
            None => DEFAULT_PORT,
        };
        let mode = match optional("BOT_MODE") {
            Some(raw) => raw.parse()?,
            None => UpdateMode::Polling,
        };
        let smtp_port = match optional("SMTP_PORT") {
            Some(raw) => parse_value::<u16>("SMTP_PORT", &raw)?,
            None => DEFAULT_SMTP_PORT,
        };

        let mut recipients: Vec<String> = optional("MAIL_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if recipients.is_empty() {
            recipients.push(sender.clone());
        }

        let path = |key: &str, default: &str| PathBuf::from(optional(key).unwrap_or_else(|| default.to_string()));

        Ok(Self {
            telegram: TelegramConfig {
                bot_token: SecretString::from(bot_token),
                authorized_chat_id,
                api_base: optional("TELEGRAM_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                mode,
                port,
                webhook_secret: optional("WEBHOOK_SECRET").map(SecretString::from),
            },
            mail: MailConfig {
                smtp_host: optional("SMTP_HOST").unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
                smtp_port,
                sender,
                password: SecretString::from(password),
                recipients,
                signature: optional("MAIL_SIGNATURE").unwrap_or_else(|| "Best regards".to_string()),
            },
            dirs: Directories {
                downloads: path("DOWNLOAD_DIR", "./telegram_photos"),
                pdfs: path("PDF_OUTPUT_DIR", "./pdfs"),
                archive: path("ARCHIVE_DIR", "./archive"),
                submission_log: path("SUBMISSION_LOG", "./submissions_log.txt"),
                bot_log: path("BOT_LOG", "./bot.log"),
            },
        })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
