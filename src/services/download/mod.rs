//! Record download service.
//!
//! A record's files are numbered 1, 2, 3... with no published count. The
//! downloader probes positions in ascending order and stops after three
//! consecutive positions fail; a 404 and an exhausted retry count the same.
//! Every terminal state is persisted to the progress store and appended to
//! the audit log before `download` returns.

mod batch;
mod fetcher;
mod types;

pub use batch::BatchDownloader;
pub use fetcher::{FetchPolicy, FetchResult, FileFetcher};
pub use types::{
    BatchProgress, BatchRecord, BatchResult, BatchStatus, DownloadEvent, RecordDownload,
    RecordState,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::{OrganizationMode, Settings};
use crate::error::{Error, Result};
use crate::models::{DownloadedFile, RecordIdentifier, RecordOutcome};
use crate::repository::ProgressStore;
use crate::scrapers::urls::PortalUrls;
use crate::services::audit_log::{AuditLog, LogLevel};
use crate::storage::{ensure_dir, DestinationDirs, FolderCounter};

/// Consecutive failed positions that end a record's file sequence.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Message stored for records whose probe found nothing.
pub const NO_FILES_MESSAGE: &str = "no files found";

/// Files collected by a probe, plus the error that cut it short, if any.
struct Probe {
    files: Vec<DownloadedFile>,
    aborted: Option<Error>,
}

/// Downloads every file of one record and records the outcome.
pub struct RecordDownloader {
    fetcher: FileFetcher,
    urls: PortalUrls,
    root: PathBuf,
    mode: OrganizationMode,
    counter: FolderCounter,
    progress: Arc<Mutex<ProgressStore>>,
    log: Arc<Mutex<AuditLog>>,
    events: Option<mpsc::Sender<DownloadEvent>>,
}

impl RecordDownloader {
    pub fn new(
        fetcher: FileFetcher,
        urls: PortalUrls,
        root: &Path,
        mode: OrganizationMode,
        progress: Arc<Mutex<ProgressStore>>,
        log: Arc<Mutex<AuditLog>>,
    ) -> Self {
        Self {
            fetcher,
            urls,
            root: root.to_path_buf(),
            mode,
            counter: FolderCounter::new(root),
            progress,
            log,
            events: None,
        }
    }

    /// Open the progress store and a fresh audit log in the configured root.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let root = settings.require_download_dir()?;
        ensure_dir(root)?;
        let progress = Arc::new(Mutex::new(ProgressStore::open(root)));
        let log = Arc::new(Mutex::new(AuditLog::create(root)?));
        info!("Downloading into {} ({})", root.display(), settings.organization);

        Ok(Self::new(
            FileFetcher::from_settings(settings)?,
            settings.urls(),
            root,
            settings.organization,
            progress,
            log,
        ))
    }

    /// Send per-file and per-record events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<DownloadEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn progress(&self) -> Arc<Mutex<ProgressStore>> {
        self.progress.clone()
    }

    pub fn audit_log(&self) -> Arc<Mutex<AuditLog>> {
        self.log.clone()
    }

    /// Download one record.
    ///
    /// `Err` is returned only when the outcome could not be persisted; every
    /// other failure is reported through `RecordDownload::state`.
    pub async fn download(&self, raw_id: &str, label: Option<&str>) -> Result<RecordDownload> {
        let stored = {
            let progress = self.progress.lock().await;
            if progress.is_processed(raw_id) {
                progress.get_outcome(raw_id).cloned()
            } else {
                None
            }
        };

        if let Some(outcome) = stored {
            info!("{} already downloaded, skipping", outcome.identifier);
            self.log.lock().await.record(&outcome);
            self.emit(DownloadEvent::RecordFinished {
                identifier: outcome.identifier.clone(),
                state: RecordState::AlreadyDownloaded,
                files: outcome.files.len(),
            })
            .await;
            return Ok(RecordDownload {
                state: RecordState::AlreadyDownloaded,
                outcome,
            });
        }

        let label = label.map(str::to_string);
        let (state, outcome) = match self.prepare(raw_id) {
            Ok((id, dirs)) => {
                let probe = self.probe(&id, &dirs).await;
                let (state, outcome) = match probe.aborted {
                    Some(e) => (
                        RecordState::Failed,
                        RecordOutcome {
                            files: probe.files,
                            ..RecordOutcome::failed(id.format(), e.to_string())
                        },
                    ),
                    None if probe.files.is_empty() => (
                        RecordState::Empty,
                        RecordOutcome::failed(id.format(), NO_FILES_MESSAGE),
                    ),
                    None => (
                        RecordState::Downloaded,
                        RecordOutcome::succeeded(id.format(), probe.files),
                    ),
                };
                let outcome = outcome
                    .with_public_link(Some(self.urls.public_url(&id)))
                    .with_storage_folder(dirs.storage_folder())
                    .with_display_number(label.clone());
                (state, outcome)
            }
            Err(e) => {
                warn!("Record {} failed: {}", raw_id, e);
                let public_link = RecordIdentifier::parse(raw_id)
                    .ok()
                    .map(|id| self.urls.public_url(&id));
                (
                    RecordState::Failed,
                    RecordOutcome::failed(RecordIdentifier::canonicalize(raw_id), e.to_string())
                        .with_public_link(public_link)
                        .with_display_number(label.clone()),
                )
            }
        };

        self.persist(&outcome).await?;

        info!(
            "Record {} finished: {:?} ({} file(s))",
            outcome.identifier,
            state,
            outcome.files.len()
        );
        self.emit(DownloadEvent::RecordFinished {
            identifier: outcome.identifier.clone(),
            state,
            files: outcome.files.len(),
        })
        .await;

        Ok(RecordDownload { state, outcome })
    }

    /// Parse the identifier and resolve its destinations.
    fn prepare(&self, raw_id: &str) -> Result<(RecordIdentifier, DestinationDirs)> {
        let id = RecordIdentifier::parse(raw_id)?;
        let dirs = DestinationDirs::resolve(&self.root, self.mode, &id, &self.counter)?;
        Ok((id, dirs))
    }

    /// Walk the file sequence until `MAX_CONSECUTIVE_FAILURES` positions in a row fail.
    async fn probe(&self, id: &RecordIdentifier, dirs: &DestinationDirs) -> Probe {
        let identifier = id.format();
        let mut files = Vec::new();
        let mut sequence_number: u32 = 1;
        let mut consecutive_failures = 0;

        while consecutive_failures < MAX_CONSECUTIVE_FAILURES {
            let url = self.urls.file_url(id, sequence_number);
            debug!("Probing {} file {}: {}", identifier, sequence_number, url);

            match self.fetcher.fetch(&url, dirs, sequence_number).await {
                Ok(results) if !results.is_empty() => {
                    let file = merge_results(sequence_number, &results);
                    let event = if file.already_existed {
                        DownloadEvent::FileSkipped {
                            identifier: identifier.clone(),
                            sequence_number,
                            file_name: file.file_name.clone(),
                        }
                    } else {
                        DownloadEvent::FileSaved {
                            identifier: identifier.clone(),
                            sequence_number,
                            file_name: file.file_name.clone(),
                            size_bytes: file.size_bytes,
                        }
                    };
                    self.emit(event).await;
                    files.push(file);
                    consecutive_failures = 0;
                }
                Ok(_) => {
                    consecutive_failures += 1;
                }
                Err(e) if e.is_fatal() => {
                    warn!("Stopping {} at file {}: {}", identifier, sequence_number, e);
                    return Probe {
                        files,
                        aborted: Some(e),
                    };
                }
                Err(e) => {
                    if matches!(e, Error::NotFound) {
                        debug!("{} file {} not found", identifier, sequence_number);
                    } else {
                        warn!("{} file {} failed: {}", identifier, sequence_number, e);
                    }
                    self.emit(DownloadEvent::FileFailed {
                        identifier: identifier.clone(),
                        sequence_number,
                        error: e.to_string(),
                    })
                    .await;
                    consecutive_failures += 1;
                }
            }
            sequence_number += 1;
        }

        Probe {
            files,
            aborted: None,
        }
    }

    /// Upsert and save the outcome, then append it to the audit log.
    async fn persist(&self, outcome: &RecordOutcome) -> Result<()> {
        let saved = {
            let mut progress = self.progress.lock().await;
            progress.upsert(outcome.clone());
            progress.save()
        };

        let mut log = self.log.lock().await;
        log.record(outcome);
        if let Err(ref e) = saved {
            log.message(
                &format!("Could not save progress for {}: {}", outcome.identifier, e),
                LogLevel::Error,
            );
        }
        saved
    }

    async fn emit(&self, event: DownloadEvent) {
        if let Some(ref tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Collapse per-destination results for one position into a file entry.
fn merge_results(sequence_number: u32, results: &[FetchResult]) -> DownloadedFile {
    DownloadedFile {
        sequence_number,
        file_name: results[0].file_name.clone(),
        size_bytes: results.iter().map(|r| r.size_bytes).max().unwrap_or(0),
        destination_tags: results.iter().map(|r| r.tag).collect(),
        already_existed: results.iter().all(|r| r.already_existed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DestinationTag;

    #[test]
    fn merge_marks_existing_only_when_every_destination_had_it() {
        let results = vec![
            FetchResult {
                tag: DestinationTag::Direct,
                file_name: "ata.pdf".into(),
                size_bytes: 10,
                already_existed: true,
            },
            FetchResult {
                tag: DestinationTag::Organized,
                file_name: "ata.pdf".into(),
                size_bytes: 10,
                already_existed: false,
            },
        ];
        let file = merge_results(4, &results);
        assert_eq!(file.sequence_number, 4);
        assert!(!file.already_existed);
        assert_eq!(
            file.destination_tags,
            vec![DestinationTag::Direct, DestinationTag::Organized]
        );

        let file = merge_results(4, &results[..1]);
        assert!(file.already_existed);
    }
}
