//! Intake gate — authorize the sender, queue photos, dispatch commands.
//!
//! Every inbound event goes through [`IntakeGate::handle`], one at a time.
//! Both update transports feed the same stream, so batch mutation and
//! pipeline runs never overlap.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use futures::StreamExt;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::channels::{InboundEvent, Messenger, Payload, Update, UpdateStream};
use crate::pipeline::{CompletionPipeline, PipelineReport};
use crate::session::Session;

pub const UNAUTHORIZED_NOTICE: &str = "⛔ Unauthorized access.";
pub const EMPTY_BATCH_NOTICE: &str = "❌ No photos received yet!";
pub const MISSING_ID_NOTICE: &str = "❌ Please provide a Site ID.\nUsage: /siteid 1333453";
pub const DOWNLOAD_FAILED_NOTICE: &str = "❌ Failed to download photo. Please send it again.";
pub const HINT_NOTICE: &str = "ℹ️ Send photos, then /siteid &lt;id&gt; to submit them.";

const USAGE: &str = "🤖 <b>JV Report Bot</b>\n\n\
1. Send the site photos (one or many).\n\
2. Send /siteid &lt;id&gt; to build the PDF and email it.\n\n\
/status shows how many photos are waiting.";

/// `/command`, optional `@BotName`, then the rest of the line.
static COMMAND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^/([A-Za-z0-9_]+)(?:@[A-Za-z0-9_]+)?(?:\s+(.*))?$")
        .expect("command pattern compiles")
});

/// A parsed bot command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/siteid`, with its first argument if one was given.
    SiteId(Option<String>),
    Start,
    Help,
    Status,
    Other(String),
}

/// Parse a slash command. `None` when `text` isn't one.
pub fn parse_command(text: &str) -> Option<Command> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let name = caps.get(1)?.as_str().to_ascii_lowercase();
    let arg = caps
        .get(2)
        .and_then(|m| m.as_str().split_whitespace().next())
        .map(str::to_string);

    Some(match name.as_str() {
        "siteid" => Command::SiteId(arg),
        "start" => Command::Start,
        "help" => Command::Help,
        "status" => Command::Status,
        _ => Command::Other(name),
    })
}

/// What handling one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum IntakeOutcome {
    Rejected { chat_id: i64 },
    PhotoQueued { count: usize, path: PathBuf },
    DownloadFailed { reason: String },
    EmptyBatch,
    MissingIdentifier,
    Submitted(PipelineReport),
    Help,
    Status { pending: usize },
    Hint,
    Ignored,
}

pub struct IntakeGate {
    authorized_chat_id: i64,
    downloads: PathBuf,
    session: Arc<Session>,
    messenger: Arc<dyn Messenger>,
    pipeline: CompletionPipeline,
}

impl IntakeGate {
    pub fn new(
        authorized_chat_id: i64,
        downloads: PathBuf,
        session: Arc<Session>,
        messenger: Arc<dyn Messenger>,
        pipeline: CompletionPipeline,
    ) -> Self {
        Self {
            authorized_chat_id,
            downloads,
            session,
            messenger,
            pipeline,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Tell the operator the bot is up.
    pub async fn announce(&self) {
        self.reply(
            self.authorized_chat_id,
            "🤖 <b>JV Report Bot Started!</b>\n\nSend photos and use:\n/siteid 1333453",
        )
        .await;
    }

    /// Consume updates until the stream ends.
    pub async fn run(&self, mut updates: UpdateStream) {
        info!(chat_id = self.authorized_chat_id, "Intake gate running");
        while let Some(update) = updates.next().await {
            let outcome = self.handle_update(update).await;
            debug!(?outcome, "Update handled");
        }
        info!("Update stream closed");
    }

    pub async fn handle_update(&self, update: Update) -> IntakeOutcome {
        let update_id = update.update_id;
        match update.into_event() {
            Some(event) => self.handle(event).await,
            None => {
                debug!(update_id, "Skipping non-message update");
                IntakeOutcome::Ignored
            }
        }
    }

    pub async fn handle(&self, event: InboundEvent) -> IntakeOutcome {
        let chat_id = event.chat_id;
        if chat_id != self.authorized_chat_id {
            warn!(chat_id, "Unauthorized access attempt");
            self.reply(chat_id, UNAUTHORIZED_NOTICE).await;
            return IntakeOutcome::Rejected { chat_id };
        }

        match event.payload {
            Payload::Photo { file_id } => self.accept_photo(chat_id, &file_id).await,
            Payload::Text(text) => self.handle_text(chat_id, &text).await,
            Payload::Unsupported => {
                debug!(chat_id, "Ignoring unsupported message");
                IntakeOutcome::Ignored
            }
        }
    }

    async fn accept_photo(&self, chat_id: i64, file_id: &str) -> IntakeOutcome {
        let dest = self.download_path().await;

        match self.messenger.download_file(file_id, &dest).await {
            Ok(bytes) => {
                let count = self.session.push(dest.clone()).await;
                info!(path = %dest.display(), bytes, count, "Photo downloaded");
                self.reply(chat_id, &format!("📸 Photo {count} received")).await;
                IntakeOutcome::PhotoQueued { count, path: dest }
            }
            Err(e) => {
                warn!(file_id, error = %e, "Photo download failed");
                self.reply(chat_id, DOWNLOAD_FAILED_NOTICE).await;
                IntakeOutcome::DownloadFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// `photo_<unix>_<pending>.jpg`, with a suffix if that name is taken.
    async fn download_path(&self) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp();
        let pending = self.session.len().await;
        let mut path = self.downloads.join(format!("photo_{stamp}_{pending}.jpg"));
        let mut n = 1;
        while tokio::fs::try_exists(&path).await.unwrap_or(false) {
            path = self
                .downloads
                .join(format!("photo_{stamp}_{pending}_{n}.jpg"));
            n += 1;
        }
        path
    }

    async fn handle_text(&self, chat_id: i64, text: &str) -> IntakeOutcome {
        match parse_command(text) {
            Some(Command::SiteId(Some(site_id))) => self.submit(chat_id, &site_id).await,
            Some(Command::SiteId(None)) => {
                self.reply(chat_id, MISSING_ID_NOTICE).await;
                IntakeOutcome::MissingIdentifier
            }
            Some(Command::Start | Command::Help) => {
                self.reply(chat_id, USAGE).await;
                IntakeOutcome::Help
            }
            Some(Command::Status) => {
                let pending = self.session.len().await;
                self.reply(chat_id, &format!("📦 Pending photos: {pending}"))
                    .await;
                IntakeOutcome::Status { pending }
            }
            Some(Command::Other(_)) | None => {
                self.reply(chat_id, HINT_NOTICE).await;
                IntakeOutcome::Hint
            }
        }
    }

    async fn submit(&self, chat_id: i64, site_id: &str) -> IntakeOutcome {
        let batch = self.session.drain().await;
        if batch.is_empty() {
            self.reply(chat_id, EMPTY_BATCH_NOTICE).await;
            return IntakeOutcome::EmptyBatch;
        }

        info!(site_id, photos = batch.len(), "Site ID received, closing batch");
        let report = self.pipeline.run(chat_id, site_id, batch).await;
        IntakeOutcome::Submitted(report)
    }

    async fn reply(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "Reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::channels::{Mailer, OutgoingMail};
    use crate::config::Directories;
    use crate::error::{ChannelError, DeliveryError};
    use crate::submission_log::SubmissionStatus;

    const OPERATOR: i64 = 42;

    #[derive(Default)]
    struct FakeMessenger {
        sent: Mutex<Vec<(i64, String)>>,
        fail_downloads: bool,
    }

    impl FakeMessenger {
        fn texts(&self) -> Vec<(i64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Messenger for FakeMessenger {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ChannelError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((chat_id, text.to_string()));
            Ok(sent.len() as i64)
        }

        async fn edit_message(&self, _: i64, _: i64, _: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn send_document(&self, _: i64, _: &Path, _: Option<&str>) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, ChannelError> {
            if self.fail_downloads {
                return Err(ChannelError::DownloadFailed {
                    file_id: file_id.to_string(),
                    reason: "HTTP 404".into(),
                });
            }
            let img = image::RgbImage::from_pixel(16, 12, image::Rgb([90, 120, 200]));
            img.save_with_format(dest, image::ImageFormat::Jpeg).unwrap();
            Ok(std::fs::metadata(dest).unwrap().len())
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<OutgoingMail>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), DeliveryError> {
            self.sent.lock().unwrap().push(mail.clone());
            Ok(())
        }

        fn recipient_count(&self) -> usize {
            1
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        gate: IntakeGate,
        messenger: Arc<FakeMessenger>,
        mailer: Arc<FakeMailer>,
    }

    fn harness(messenger: FakeMessenger) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let dirs = Directories::under(dir.path());
        dirs.ensure().unwrap();
        let messenger = Arc::new(messenger);
        let mailer = Arc::new(FakeMailer::default());
        let pipeline = CompletionPipeline::new(
            messenger.clone(),
            mailer.clone(),
            dirs.clone(),
            "Best regards",
        );
        let gate = IntakeGate::new(
            OPERATOR,
            dirs.downloads.clone(),
            Arc::new(Session::new()),
            messenger.clone(),
            pipeline,
        );
        Harness {
            _dir: dir,
            gate,
            messenger,
            mailer,
        }
    }

    fn photo(chat_id: i64, file_id: &str) -> InboundEvent {
        InboundEvent {
            chat_id,
            payload: Payload::Photo {
                file_id: file_id.into(),
            },
        }
    }

    fn text(chat_id: i64, body: &str) -> InboundEvent {
        InboundEvent {
            chat_id,
            payload: Payload::Text(body.into()),
        }
    }

    // ── Command parsing ─────────────────────────────────────────────

    #[test]
    fn parses_siteid_with_argument() {
        assert_eq!(
            parse_command("/siteid 12345"),
            Some(Command::SiteId(Some("12345".into())))
        );
    }

    #[test]
    fn parses_siteid_addressed_to_bot() {
        assert_eq!(
            parse_command("/siteid@JvReportBot IN-99"),
            Some(Command::SiteId(Some("IN-99".into())))
        );
    }

    #[test]
    fn siteid_takes_first_word() {
        assert_eq!(
            parse_command("/siteid 12345 north gate"),
            Some(Command::SiteId(Some("12345".into())))
        );
    }

    #[test]
    fn siteid_without_argument() {
        assert_eq!(parse_command("/siteid"), Some(Command::SiteId(None)));
        assert_eq!(parse_command("/siteid   "), Some(Command::SiteId(None)));
    }

    #[test]
    fn other_commands() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command("/HELP"), Some(Command::Help));
        assert_eq!(parse_command("/status"), Some(Command::Status));
        assert_eq!(parse_command("/foo bar"), Some(Command::Other("foo".into())));
    }

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("siteid 1"), None);
    }

    // ── Gate behaviour ──────────────────────────────────────────────

    #[tokio::test]
    async fn unauthorized_chat_is_rejected() {
        let h = harness(FakeMessenger::default());

        let outcome = h.gate.handle(photo(7, "abc")).await;

        assert_eq!(outcome, IntakeOutcome::Rejected { chat_id: 7 });
        assert!(h.gate.session().is_empty().await);
        assert_eq!(h.messenger.texts(), vec![(7, UNAUTHORIZED_NOTICE.to_string())]);
    }

    #[tokio::test]
    async fn unauthorized_siteid_does_not_drain() {
        let h = harness(FakeMessenger::default());
        h.gate.handle(photo(OPERATOR, "a")).await;

        let outcome = h.gate.handle(text(7, "/siteid 1")).await;

        assert_eq!(outcome, IntakeOutcome::Rejected { chat_id: 7 });
        assert_eq!(h.gate.session().len().await, 1);
        assert!(h.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn photos_are_counted_and_acknowledged() {
        let h = harness(FakeMessenger::default());

        let first = h.gate.handle(photo(OPERATOR, "a")).await;
        let second = h.gate.handle(photo(OPERATOR, "b")).await;

        assert!(matches!(first, IntakeOutcome::PhotoQueued { count: 1, .. }));
        let IntakeOutcome::PhotoQueued { count, path } = second else {
            panic!("expected PhotoQueued, got {second:?}");
        };
        assert_eq!(count, 2);
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("photo_") && name.ends_with(".jpg"), "{name}");

        let texts = h.messenger.texts();
        assert_eq!(texts[0].1, "📸 Photo 1 received");
        assert_eq!(texts[1].1, "📸 Photo 2 received");
    }

    #[tokio::test]
    async fn failed_download_is_not_queued() {
        let h = harness(FakeMessenger {
            fail_downloads: true,
            ..Default::default()
        });

        let outcome = h.gate.handle(photo(OPERATOR, "gone")).await;

        assert!(matches!(outcome, IntakeOutcome::DownloadFailed { .. }));
        assert!(h.gate.session().is_empty().await);
        assert_eq!(h.messenger.texts()[0].1, DOWNLOAD_FAILED_NOTICE);
    }

    #[tokio::test]
    async fn siteid_on_empty_batch() {
        let h = harness(FakeMessenger::default());

        let outcome = h.gate.handle(text(OPERATOR, "/siteid 12345")).await;

        assert_eq!(outcome, IntakeOutcome::EmptyBatch);
        assert_eq!(h.messenger.texts()[0].1, EMPTY_BATCH_NOTICE);
        assert!(h.mailer.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn siteid_without_id_keeps_batch() {
        let h = harness(FakeMessenger::default());
        h.gate.handle(photo(OPERATOR, "a")).await;

        let outcome = h.gate.handle(text(OPERATOR, "/siteid")).await;

        assert_eq!(outcome, IntakeOutcome::MissingIdentifier);
        assert_eq!(h.gate.session().len().await, 1);
    }

    #[tokio::test]
    async fn siteid_submits_and_clears_batch() {
        let h = harness(FakeMessenger::default());
        h.gate.handle(photo(OPERATOR, "a")).await;
        h.gate.handle(photo(OPERATOR, "b")).await;

        let outcome = h.gate.handle(text(OPERATOR, "/siteid 555")).await;

        let IntakeOutcome::Submitted(report) = outcome else {
            panic!("expected Submitted, got {outcome:?}");
        };
        assert_eq!(report.site_id, "555");
        assert_eq!(report.photo_count, 2);
        assert_eq!(report.status, SubmissionStatus::Success);
        assert!(h.gate.session().is_empty().await);
        assert_eq!(h.mailer.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_reports_pending_count() {
        let h = harness(FakeMessenger::default());
        h.gate.handle(photo(OPERATOR, "a")).await;

        let outcome = h.gate.handle(text(OPERATOR, "/status")).await;

        assert_eq!(outcome, IntakeOutcome::Status { pending: 1 });
        assert_eq!(h.messenger.texts().last().unwrap().1, "📦 Pending photos: 1");
    }

    #[tokio::test]
    async fn help_and_hint() {
        let h = harness(FakeMessenger::default());
        assert_eq!(h.gate.handle(text(OPERATOR, "/start")).await, IntakeOutcome::Help);
        assert_eq!(h.gate.handle(text(OPERATOR, "what now?")).await, IntakeOutcome::Hint);
        assert_eq!(h.messenger.texts().last().unwrap().1, HINT_NOTICE);
    }

    #[tokio::test]
    async fn unsupported_payload_is_ignored_silently() {
        let h = harness(FakeMessenger::default());
        let outcome = h
            .gate
            .handle(InboundEvent {
                chat_id: OPERATOR,
                payload: Payload::Unsupported,
            })
            .await;
        assert_eq!(outcome, IntakeOutcome::Ignored);
        assert!(h.messenger.texts().is_empty());
    }

    #[tokio::test]
    async fn update_without_message_is_ignored() {
        let h = harness(FakeMessenger::default());
        let update = Update {
            update_id: 9,
            message: None,
        };
        assert_eq!(h.gate.handle_update(update).await, IntakeOutcome::Ignored);
    }
}
