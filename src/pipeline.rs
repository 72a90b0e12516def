//! Completion pipeline — turn a drained batch into a delivered PDF.
//!
//! Steps, in order: normalize every photo, assemble the PDF, mail it, tell
//! the operator, append a submission log line, archive the photos. Only PDF
//! assembly and mail delivery can stop a batch; everything else is logged
//! and skipped over.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::channels::{Mailer, Messenger, OutgoingMail};
use crate::config::Directories;
use crate::error::PipelineError;
use crate::media::{
    DocumentSummary, NormalizeOptions, NormalizeOutcome, PageLayout, assemble_document,
    normalize_image,
};
use crate::submission_log::{SubmissionLog, SubmissionRecord, SubmissionStatus};

/// Edit the progress message after this many photos.
const PROGRESS_EVERY: usize = 5;

/// Summary of one batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub site_id: String,
    pub photo_count: usize,
    pub status: SubmissionStatus,
    pub pdf_path: Option<PathBuf>,
    pub normalize_failures: usize,
    /// Reason the batch stopped, if it did.
    pub error: Option<String>,
}

pub struct CompletionPipeline {
    messenger: Arc<dyn Messenger>,
    mailer: Arc<dyn Mailer>,
    log: SubmissionLog,
    dirs: Directories,
    signature: String,
    normalize: NormalizeOptions,
    layout: PageLayout,
}

impl CompletionPipeline {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        mailer: Arc<dyn Mailer>,
        dirs: Directories,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            messenger,
            mailer,
            log: SubmissionLog::new(dirs.submission_log.clone()),
            dirs,
            signature: signature.into(),
            normalize: NormalizeOptions::default(),
            layout: PageLayout::default(),
        }
    }

    pub fn with_normalize_options(mut self, options: NormalizeOptions) -> Self {
        self.normalize = options;
        self
    }

    pub fn with_layout(mut self, layout: PageLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Process one drained batch. The batch is consumed either way; nothing
    /// is requeued on failure.
    pub async fn run(&self, chat_id: i64, site_id: &str, photos: Vec<PathBuf>) -> PipelineReport {
        let photo_count = photos.len();
        let site = html_escape(site_id);
        info!(site_id, photo_count, "Processing batch");

        self.notify(
            chat_id,
            &format!(
                "🚀 <b>Starting Processing</b>\n\n📋 Site ID: {site}\n📸 Total Photos: {photo_count}\n\nPlease wait..."
            ),
        )
        .await;

        let progress = Progress::start(Arc::clone(&self.messenger), chat_id, &site, photo_count).await;

        let normalize_failures = self.normalize_all(&photos, &progress).await;

        let mut report = PipelineReport {
            site_id: site_id.to_string(),
            photo_count,
            status: SubmissionStatus::Success,
            pdf_path: None,
            normalize_failures,
            error: None,
        };

        let pdf_path = self.dirs.pdfs.join(format!("{}.pdf", file_stem(site_id)));
        let summary = match self.assemble(photos.clone(), pdf_path).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(site_id, error = %e, "PDF creation failed");
                self.notify(
                    chat_id,
                    &format!("❌ Failed to create PDF for Site {site}. Check bot.log for details."),
                )
                .await;
                report.status = SubmissionStatus::PdfError;
                report.error = Some(e.to_string());
                self.record(&report).await;
                return report;
            }
        };
        report.pdf_path = Some(summary.path.clone());

        if let Err(e) = self.deliver(site_id, &summary).await {
            error!(site_id, error = %e, "Email error");
            self.notify(
                chat_id,
                &format!(
                    "❌ Error sending email. Check bot.log for details.\n\n{}",
                    html_escape(&e.to_string())
                ),
            )
            .await;
            report.status = SubmissionStatus::EmailError;
            report.error = Some(e.to_string());
            self.record(&report).await;
            return report;
        }

        progress
            .set(&format!(
                "✅ PDF Created: {} pages ({:.2}MB)\n✅ Email Sent: {} recipients\n\n<b>COMPLETED!</b>",
                summary.pages,
                summary.size_mb(),
                self.mailer.recipient_count()
            ))
            .await;

        if let Err(e) = self
            .messenger
            .send_document(chat_id, &summary.path, Some(&format!("PDF for Site {site_id}")))
            .await
        {
            warn!(site_id, error = %e, "Could not send PDF back to operator");
        }

        self.record(&report).await;
        self.archive(site_id, &photos).await;

        info!(site_id, photo_count, pages = summary.pages, "Batch delivered");
        report
    }

    async fn normalize_all(&self, photos: &[PathBuf], progress: &Progress) -> usize {
        let total = photos.len();
        let mut failures = 0;

        for (index, photo) in photos.iter().enumerate() {
            let path = photo.clone();
            let options = self.normalize;
            let outcome = tokio::task::spawn_blocking(move || normalize_image(&path, &options))
                .await
                .unwrap_or_else(|e| NormalizeOutcome::Failed {
                    reason: format!("normalize task failed: {e}"),
                });
            if outcome.is_failed() {
                failures += 1;
            }

            let done = index + 1;
            if done % PROGRESS_EVERY == 0 || done == total {
                progress
                    .set(&format!("🔄 Creating PDF pages...\nProgress: {done}/{total}"))
                    .await;
            }
        }

        failures
    }

    async fn assemble(
        &self,
        photos: Vec<PathBuf>,
        output: PathBuf,
    ) -> Result<DocumentSummary, PipelineError> {
        let layout = self.layout;
        let summary =
            tokio::task::spawn_blocking(move || assemble_document(&photos, &output, &layout))
                .await??;
        Ok(summary)
    }

    async fn deliver(&self, site_id: &str, summary: &DocumentSummary) -> Result<(), PipelineError> {
        let mail = OutgoingMail::for_site(site_id, &self.signature, summary.path.clone());
        self.mailer.send(&mail).await?;
        Ok(())
    }

    async fn record(&self, report: &PipelineReport) {
        let record = SubmissionRecord::now(&report.site_id, report.photo_count, report.status);
        if let Err(e) = self.log.record(&record).await {
            error!(path = %self.log.path().display(), error = %e, "Could not write submission log");
        }
    }

    /// Move delivered photos under `<archive>/<site id>/`.
    async fn archive(&self, site_id: &str, photos: &[PathBuf]) {
        let target = self.dirs.archive.join(file_stem(site_id));
        if let Err(e) = tokio::fs::create_dir_all(&target).await {
            warn!(path = %target.display(), error = %e, "Could not create archive directory");
            return;
        }

        for photo in photos {
            let Some(name) = photo.file_name() else {
                continue;
            };
            if let Err(e) = tokio::fs::rename(photo, target.join(name)).await {
                warn!(path = %photo.display(), error = %e, "Could not archive photo");
            }
        }
    }

    async fn notify(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "Operator notification failed");
        }
    }
}

/// The editable "Progress for Site …" message.
struct Progress {
    messenger: Arc<dyn Messenger>,
    chat_id: i64,
    header: String,
    message_id: Option<i64>,
}

impl Progress {
    async fn start(messenger: Arc<dyn Messenger>, chat_id: i64, site: &str, total: usize) -> Self {
        let header = format!("📊 <b>Progress for Site {site}</b>");
        let message_id = match messenger
            .send_message(
                chat_id,
                &format!("{header}\n\n🔄 Compressing images...\nProgress: 0/{total}"),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(chat_id, error = %e, "Could not send progress message");
                None
            }
        };
        Self {
            messenger,
            chat_id,
            header,
            message_id,
        }
    }

    async fn set(&self, body: &str) {
        let Some(message_id) = self.message_id else {
            return;
        };
        let text = format!("{}\n\n{body}", self.header);
        if let Err(e) = self
            .messenger
            .edit_message(self.chat_id, message_id, &text)
            .await
        {
            tracing::debug!(error = %e, "Progress edit failed");
        }
    }
}

/// File-name-safe form of an identifier: separators, `..` and control
/// characters become `_`, leading/trailing dots are dropped.
pub fn file_stem(site_id: &str) -> String {
    let cleaned: String = site_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .replace("..", "_");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "site".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Escape text for Telegram's HTML parse mode.
pub(crate) fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_keeps_plain_ids() {
        assert_eq!(file_stem("12345"), "12345");
        assert_eq!(file_stem("IN-1333453"), "IN-1333453");
    }

    #[test]
    fn file_stem_blocks_traversal() {
        assert_eq!(file_stem("../../etc/passwd"), "____etc_passwd");
        assert_eq!(file_stem(".."), "_");
        assert_eq!(file_stem("."), "site");
        assert_eq!(file_stem("a\\b"), "a_b");
    }

    #[test]
    fn file_stem_never_empty() {
        assert_eq!(file_stem("   "), "site");
    }

    #[test]
    fn html_escape_specials() {
        assert_eq!(html_escape("a<b>&c"), "a&lt;b&gt;&amp;c");
    }
}
