//! Email channel — SMTP delivery of the finished PDF via lettre.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::MailConfig;
use crate::error::DeliveryError;

/// Subject line; `{site_id}` is replaced with the operator's identifier.
pub const SUBJECT_TEMPLATE: &str = "Submission of Joint Visit (JV) Documents – Indus ID: {site_id}";

/// Body text; `{site_id}` and `{signature}` are substituted.
pub const BODY_TEMPLATE: &str = "Dear Sir,

Please find attached the Joint Visit (JV) documents for your reference. The site details and photographs are attached as a single PDF.

Indus ID: {site_id}

{signature}
";

/// A message ready to hand to a [`Mailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub subject: String,
    pub body: String,
    pub attachment: PathBuf,
}

impl OutgoingMail {
    /// Fill the subject and body templates for one submission.
    pub fn for_site(site_id: &str, signature: &str, attachment: PathBuf) -> Self {
        Self {
            subject: SUBJECT_TEMPLATE.replace("{site_id}", site_id),
            body: BODY_TEMPLATE
                .replace("{site_id}", site_id)
                .replace("{signature}", signature),
            attachment,
        }
    }
}

/// Outbound mail delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one message to the configured recipients.
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError>;

    /// How many recipients each message goes to.
    fn recipient_count(&self) -> usize;
}

/// SMTP mailer — one STARTTLS session per message, no retry.
pub struct SmtpMailer {
    config: MailConfig,
}

impl SmtpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }

    /// Assemble the MIME message: plain-text body plus the PDF attachment.
    pub fn build_message(&self, mail: &OutgoingMail) -> Result<Message, DeliveryError> {
        build_message(&self.config, mail)
    }

    fn transport(&self) -> Result<SmtpTransport, DeliveryError> {
        let creds = Credentials::new(
            self.config.sender.clone(),
            self.config.password.expose_secret().to_string(),
        );

        Ok(SmtpTransport::starttls_relay(&self.config.smtp_host)
            .map_err(|e| DeliveryError::Smtp(format!("SMTP relay error: {e}")))?
            .port(self.config.smtp_port)
            .credentials(creds)
            .build())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
        let message = self.build_message(mail)?;
        let transport = self.transport()?;
        let recipients = self.config.recipients.len();

        // lettre's SmtpTransport blocks for the whole session.
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| DeliveryError::Smtp(format!("SMTP task failed: {e}")))?
            .map_err(|e| DeliveryError::Smtp(format!("SMTP send failed: {e}")))?;

        tracing::info!(subject = %mail.subject, recipients, "Email sent");
        Ok(())
    }

    fn recipient_count(&self) -> usize {
        self.config.recipients.len()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Build the message for `mail` addressed from `config.sender` to every
/// configured recipient.
pub fn build_message(config: &MailConfig, mail: &OutgoingMail) -> Result<Message, DeliveryError> {
    if config.recipients.is_empty() {
        return Err(DeliveryError::NoRecipients);
    }

    let mut builder = Message::builder()
        .from(parse_mailbox(&config.sender)?)
        .subject(mail.subject.clone());
    for recipient in &config.recipients {
        builder = builder.to(parse_mailbox(recipient)?);
    }

    let bytes = std::fs::read(&mail.attachment).map_err(|source| DeliveryError::Attachment {
        path: mail.attachment.clone(),
        source,
    })?;
    let file_name = attachment_name(&mail.attachment);
    let content_type = ContentType::parse("application/pdf")
        .map_err(|e| DeliveryError::Build(format!("content type: {e}")))?;

    builder
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(mail.body.clone()))
                .singlepart(Attachment::new(file_name).body(bytes, content_type)),
        )
        .map_err(|e| DeliveryError::Build(e.to_string()))
}

fn attachment_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("document.pdf")
        .to_string()
}

// ── Tests ───────────────────────────────────────────────────────────
