//! Pending batch — the photos received since the last completion command.

use std::path::PathBuf;

use tokio::sync::Mutex;

/// In-memory, ordered list of downloaded photo paths for the single
/// authorized operator. Lives for the process lifetime only.
#[derive(Debug, Default)]
pub struct Session {
    pending: Mutex<Vec<PathBuf>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a photo and return the new pending count.
    pub async fn push(&self, path: PathBuf) -> usize {
        let mut pending = self.pending.lock().await;
        pending.push(path);
        pending.len()
    }

    /// Take every pending photo and leave the batch empty.
    ///
    /// Copy and clear happen under one lock, so a photo pushed concurrently
    /// lands either in the returned batch or in the next one, never neither.
    pub async fn drain(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.pending.lock().await)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}
