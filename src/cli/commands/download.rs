//! Download commands.

use std::path::Path;

use console::style;
use indicatif::ProgressBar;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use atacquire::config::Settings;
use atacquire::models::SearchResultItem;
use atacquire::services::{
    BatchDownloader, BatchProgress, BatchRecord, BatchStatus, DownloadEvent, RecordState,
};
use atacquire::utils::format_size;

use crate::cli::helpers::{actionable, bar_style, cancel_on_ctrl_c, open_downloader};

/// Download every file of one record.
pub async fn cmd_download(
    settings: &Settings,
    identifier: &str,
    label: Option<&str>,
) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<DownloadEvent>(100);
    let downloader = open_downloader(settings)?.with_events(event_tx);
    let audit_log = downloader.audit_log();

    println!("{} Downloading {}", style("→").cyan(), identifier.trim());

    let event_handler = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                DownloadEvent::FileSaved {
                    sequence_number,
                    file_name,
                    size_bytes,
                    ..
                } => println!(
                    "  {} [{}] {} ({})",
                    style("✓").green(),
                    sequence_number,
                    file_name,
                    format_size(size_bytes)
                ),
                DownloadEvent::FileSkipped {
                    sequence_number,
                    file_name,
                    ..
                } => println!(
                    "  {} [{}] {} already exists",
                    style("→").dim(),
                    sequence_number,
                    file_name
                ),
                DownloadEvent::FileFailed {
                    sequence_number,
                    error,
                    ..
                } => tracing::debug!("File {} failed: {}", sequence_number, error),
                DownloadEvent::RecordFinished { .. } => {}
            }
        }
    });

    let result = downloader.download(identifier, label).await;
    drop(downloader);
    if let Err(e) = event_handler.await {
        tracing::warn!("Event handler task failed: {}", e);
    }
    let log_path = audit_log.lock().await.finish();

    let download = result.map_err(actionable)?;
    let outcome = &download.outcome;

    match download.state {
        RecordState::Downloaded => println!(
            "{} {} file(s), {}",
            style("✓").green(),
            outcome.files.len(),
            format_size(outcome.total_bytes())
        ),
        RecordState::AlreadyDownloaded => println!(
            "{} Already downloaded ({} file(s))",
            style("✓").green(),
            outcome.files.len()
        ),
        RecordState::Empty | RecordState::Failed => println!(
            "{} {}",
            style("✗").red(),
            outcome.error_message.as_deref().unwrap_or("download failed")
        ),
    }
    if let Some(ref folder) = outcome.storage_folder {
        println!("  {} Folder: {}", style("→").dim(), folder);
    }
    println!("  {} Log: {}", style("→").dim(), log_path.display());

    Ok(())
}

/// Download every record of a saved search.
pub async fn cmd_batch(settings: &Settings, results: &Path) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(results)?;
    let items: Vec<SearchResultItem> = serde_json::from_str(&contents)?;

    if items.is_empty() {
        println!("{} No records in {}", style("!").yellow(), results.display());
        return Ok(());
    }

    let records: Vec<BatchRecord> = items.iter().map(BatchRecord::from).collect();
    let cancel = cancel_on_ctrl_c();
    run_batch(settings, &records, &cancel).await
}

/// Run a batch with a progress bar.
pub async fn run_batch(
    settings: &Settings,
    records: &[BatchRecord],
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let batch = BatchDownloader::new(open_downloader(settings)?, settings.record_delay());

    println!(
        "{} Downloading {} record(s) into {}",
        style("→").cyan(),
        records.len(),
        batch.downloader().root().display()
    );

    let bar = ProgressBar::new(records.len() as u64);
    bar.set_style(bar_style());

    let (progress_tx, mut progress_rx) = mpsc::channel::<BatchProgress>(100);
    let display = bar.clone();
    let progress_handler = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            let label = progress
                .display_number
                .as_deref()
                .unwrap_or(&progress.identifier)
                .to_string();
            match progress.status {
                BatchStatus::Starting => display.set_message(label),
                BatchStatus::Success => {
                    display.inc(1);
                    display.println(format!(
                        "  {} {}: {}",
                        style("✓").green(),
                        label,
                        progress.message
                    ));
                }
                BatchStatus::AlreadyDownloaded => {
                    display.inc(1);
                    display.println(format!("  {} {}: {}", style("→").dim(), label, progress.message));
                }
                BatchStatus::Error => {
                    display.inc(1);
                    display.println(format!(
                        "  {} {}: {}",
                        style("✗").red(),
                        label,
                        progress.message
                    ));
                }
            }
        }
    });

    let result = batch.download_all(records, cancel, Some(&progress_tx)).await;
    drop(progress_tx);
    if let Err(e) = progress_handler.await {
        tracing::warn!("Progress handler task failed: {}", e);
    }
    bar.finish_and_clear();

    let log_path = batch.downloader().audit_log().lock().await.finish();

    let marker = if result.failed == 0 && !result.cancelled {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!("{} {}", marker, result.summary());
    println!("  {} Log: {}", style("→").dim(), log_path.display());

    Ok(())
}
