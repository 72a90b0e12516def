//! Append-only submission log — one text line per completed batch.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::io::AsyncWriteExt;

/// How a batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Success,
    EmailError,
    PdfError,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "Success",
            Self::EmailError => "Email Error",
            Self::PdfError => "PDF Error",
        };
        write!(f, "{s}")
    }
}

/// One line of the log.
#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub timestamp: DateTime<Local>,
    pub site_id: String,
    pub photo_count: usize,
    pub status: SubmissionStatus,
}

impl SubmissionRecord {
    pub fn now(site_id: &str, photo_count: usize, status: SubmissionStatus) -> Self {
        Self {
            timestamp: Local::now(),
            site_id: site_id.to_string(),
            photo_count,
            status,
        }
    }

    /// `19-Oct-2026 14:05 | Site ID: 12345 | Photos: 3 | Status: Success`
    pub fn to_line(&self) -> String {
        format!(
            "{} | Site ID: {} | Photos: {} | Status: {}",
            self.timestamp.format("%d-%b-%Y %H:%M"),
            self.site_id,
            self.photo_count,
            self.status
        )
    }
}

/// The log file. Opened, appended and closed on every write.
#[derive(Debug, Clone)]
pub struct SubmissionLog {
    path: PathBuf,
}

impl SubmissionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub async fn record(&self, record: &SubmissionRecord) -> std::io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let mut line = record.to_line();
        line.push('\n');
        file.write_all(line.as_bytes()).await?;
        file.flush().await
    }
}
