//! Sequential batch download with cooperative cancellation.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{BatchProgress, BatchRecord, BatchResult, BatchStatus, RecordDownloader, RecordState};
use crate::models::{RecordIdentifier, RecordOutcome};
use crate::services::audit_log::LogLevel;

/// Downloads a list of records one at a time.
pub struct BatchDownloader {
    downloader: RecordDownloader,
    record_delay: Duration,
}

impl BatchDownloader {
    pub fn new(downloader: RecordDownloader, record_delay: Duration) -> Self {
        Self {
            downloader,
            record_delay,
        }
    }

    pub fn downloader(&self) -> &RecordDownloader {
        &self.downloader
    }

    /// Download `records` in order.
    ///
    /// Cancellation is checked before each record; a record that has started
    /// always runs to completion. Per-record errors are counted as failures and
    /// never abort the batch.
    pub async fn download_all(
        &self,
        records: &[BatchRecord],
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<BatchProgress>>,
    ) -> BatchResult {
        let total = records.len();
        let mut result = BatchResult {
            total,
            ..Default::default()
        };
        info!("Starting batch of {} record(s)", total);

        for (index, record) in records.iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Batch cancelled after {} of {} record(s)", index, total);
                result.cancelled = true;
                break;
            }

            let current = index + 1;
            report(
                progress,
                record,
                BatchStatus::Starting,
                format!("Downloading {current}/{total}"),
                current,
                total,
            )
            .await;

            let (status, message, outcome) = match self
                .downloader
                .download(&record.identifier, record.display_number.as_deref())
                .await
            {
                Ok(download) => match download.state {
                    RecordState::Downloaded => {
                        result.succeeded += 1;
                        let message =
                            format!("{} file(s) downloaded", download.outcome.files.len());
                        (BatchStatus::Success, message, download.outcome)
                    }
                    RecordState::AlreadyDownloaded => {
                        result.already_downloaded += 1;
                        (
                            BatchStatus::AlreadyDownloaded,
                            "Already downloaded".to_string(),
                            download.outcome,
                        )
                    }
                    RecordState::Empty | RecordState::Failed => {
                        result.failed += 1;
                        let message = download
                            .outcome
                            .error_message
                            .clone()
                            .unwrap_or_else(|| "download failed".to_string());
                        (BatchStatus::Error, message, download.outcome)
                    }
                },
                Err(e) => {
                    warn!("Record {} aborted: {}", record.identifier, e);
                    result.failed += 1;
                    let outcome = RecordOutcome::failed(
                        RecordIdentifier::canonicalize(&record.identifier),
                        e.to_string(),
                    )
                    .with_display_number(record.display_number.clone());
                    (BatchStatus::Error, e.to_string(), outcome)
                }
            };

            report(progress, record, status, message, current, total).await;
            result.details.push(outcome);

            if current < total && !self.record_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.record_delay) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        let stats = self.downloader.progress().lock().await.statistics();
        let log = self.downloader.audit_log();
        let mut log = log.lock().await;
        log.message(&result.summary(), LogLevel::Info);
        log.statistics(&stats);
        log.flush();

        info!("{}", result.summary());
        result
    }
}

async fn report(
    progress: Option<&mpsc::Sender<BatchProgress>>,
    record: &BatchRecord,
    status: BatchStatus,
    message: String,
    current: usize,
    total: usize,
) {
    if let Some(tx) = progress {
        let _ = tx
            .send(BatchProgress {
                identifier: record.identifier.clone(),
                display_number: record.display_number.clone(),
                status,
                message,
                current,
                total,
            })
            .await;
    }
}
