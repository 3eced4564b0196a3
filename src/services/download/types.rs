//! Download service types and events.

use serde::Serialize;

use crate::models::RecordOutcome;

/// Events emitted while a record is being downloaded.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// A file was written to at least one destination.
    FileSaved {
        identifier: String,
        sequence_number: u32,
        file_name: String,
        size_bytes: u64,
    },
    /// The file was already on disk in every destination.
    FileSkipped {
        identifier: String,
        sequence_number: u32,
        file_name: String,
    },
    /// One probe position failed (404 or an exhausted retry).
    FileFailed {
        identifier: String,
        sequence_number: u32,
        error: String,
    },
    /// The record reached a terminal state.
    RecordFinished {
        identifier: String,
        state: RecordState,
        files: usize,
    },
}

/// Terminal state of one record download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// Files were collected in this run.
    Downloaded,
    /// A successful outcome was already stored; nothing was fetched.
    AlreadyDownloaded,
    /// The probe found no files.
    Empty,
    /// The attempt failed before or during probing.
    Failed,
}

/// Result of `RecordDownloader::download`.
#[derive(Debug, Clone)]
pub struct RecordDownload {
    pub state: RecordState,
    pub outcome: RecordOutcome,
}

/// Batch progress status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchStatus {
    Starting,
    Success,
    AlreadyDownloaded,
    Error,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Success => "success",
            Self::AlreadyDownloaded => "already-downloaded",
            Self::Error => "error",
        }
    }
}

/// Progress report emitted before and after each record of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub identifier: String,
    pub display_number: Option<String>,
    pub status: BatchStatus,
    pub message: String,
    /// 1-based position in the batch.
    pub current: usize,
    pub total: usize,
}

/// One entry of a batch: the record and its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRecord {
    pub identifier: String,
    pub display_number: Option<String>,
}

impl BatchRecord {
    pub fn new(identifier: impl Into<String>, display_number: Option<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_number,
        }
    }
}

impl From<&crate::models::SearchResultItem> for BatchRecord {
    fn from(item: &crate::models::SearchResultItem) -> Self {
        Self::new(item.identifier.clone(), Some(item.display_number.clone()))
    }
}

/// Result of a batch download.
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    pub total: usize,
    pub succeeded: usize,
    pub already_downloaded: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// One outcome per record that was started, in input order.
    pub details: Vec<RecordOutcome>,
}

impl BatchResult {
    /// One-line summary for display.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{} of {} record(s): {} downloaded, {} already downloaded, {} failed",
            self.details.len(),
            self.total,
            self.succeeded,
            self.already_downloaded,
            self.failed
        );
        if self.cancelled {
            summary.push_str(" (cancelled)");
        }
        summary
    }
}
