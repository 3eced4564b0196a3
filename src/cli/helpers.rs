//! Shared helpers for CLI commands.

use std::path::Path;

use console::style;
use indicatif::ProgressStyle;
use tokio_util::sync::CancellationToken;

use atacquire::config::Settings;
use atacquire::services::RecordDownloader;
use atacquire::Error;

/// Cancellation token tripped by the first Ctrl-C.
///
/// Work in progress finishes its current unit (one page or one record) before
/// stopping; a second Ctrl-C is left to the default handler.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{} Cancelling after the current step finishes...",
                style("!").yellow()
            );
            trigger.cancel();
        }
    });
    token
}

/// Open the downloader for the configured root, turning setup errors into
/// messages the user can act on.
pub fn open_downloader(settings: &Settings) -> anyhow::Result<RecordDownloader> {
    RecordDownloader::from_settings(settings).map_err(actionable)
}

/// The download root, or an actionable error.
pub fn download_root(settings: &Settings) -> anyhow::Result<&Path> {
    settings.require_download_dir().map_err(actionable)
}

/// Attach a remedy to configuration and storage errors.
pub fn actionable(e: Error) -> anyhow::Error {
    match e {
        Error::ConfigurationMissing(_) => anyhow::anyhow!(
            "{}\n  {} example: ata --download-dir ~/atas download <identifier>",
            e,
            style("→").dim()
        ),
        Error::StorageUnavailable { .. } => anyhow::anyhow!(
            "{}\n  {} check that the download directory exists and is writable, \
             or reconfigure it with --download-dir",
            e,
            style("→").dim()
        ),
        other => other.into(),
    }
}

pub fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}
