//! Single-file downloader with retry and duplicate short-circuit.

use std::path::Path;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::models::DestinationTag;
use crate::scrapers::http_client::HttpClient;
use crate::storage::{fallback_filename, sanitize_filename, DestinationDirs};

/// Retry policy for one file. The wait after failed attempt `n` is
/// `2^n * base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl FetchPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }
}

/// Outcome of writing one file to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub tag: DestinationTag,
    pub file_name: String,
    /// Bytes written; for already existing files, their size on disk.
    pub size_bytes: u64,
    pub already_existed: bool,
}

/// A file freshly written to disk.
#[derive(Debug)]
struct SavedFile {
    file_name: String,
    size_bytes: u64,
}

/// Downloads individual files of a record's file sequence.
#[derive(Clone)]
pub struct FileFetcher {
    client: HttpClient,
    policy: FetchPolicy,
}

impl FileFetcher {
    pub fn new(client: HttpClient, policy: FetchPolicy) -> Self {
        Self { client, policy }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let client = HttpClient::new(settings.request_timeout(), settings.user_agent.as_deref())?;
        Ok(Self::new(client, FetchPolicy::from_settings(settings)))
    }

    /// Download `url` into every destination, direct first.
    ///
    /// `AlreadyExists` on one destination is recorded and does not stop the
    /// others. Any other error propagates immediately.
    pub async fn fetch(
        &self,
        url: &str,
        destinations: &DestinationDirs,
        sequence_number: u32,
    ) -> Result<Vec<FetchResult>> {
        let mut results = Vec::new();

        for (tag, dir) in destinations.iter() {
            match self.fetch_with_retry(url, dir, sequence_number).await {
                Ok(saved) => results.push(FetchResult {
                    tag,
                    file_name: saved.file_name,
                    size_bytes: saved.size_bytes,
                    already_existed: false,
                }),
                Err(Error::AlreadyExists { path }) => {
                    debug!("{} already exists, skipping", path.display());
                    let size_bytes = tokio::fs::metadata(&path)
                        .await
                        .map(|m| m.len())
                        .unwrap_or(0);
                    results.push(FetchResult {
                        tag,
                        file_name: file_name_of(&path, sequence_number),
                        size_bytes,
                        already_existed: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        dir: &Path,
        sequence_number: u32,
    ) -> Result<SavedFile> {
        let attempts = self.policy.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_once(url, dir, sequence_number).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.is_terminal() || e.is_fatal() || attempt >= attempts => return Err(e),
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt, attempts, url, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn fetch_once(&self, url: &str, dir: &Path, sequence_number: u32) -> Result<SavedFile> {
        let mut response = self.client.get(url).await?;

        match response.status.as_u16() {
            200 => {}
            404 => return Err(Error::NotFound),
            429 => return Err(Error::RateLimited),
            code => return Err(Error::UnexpectedStatus(code)),
        }

        let file_name = response
            .content_disposition_filename()
            .map(|name| sanitize_filename(&name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback_filename(sequence_number));
        let dest = dir.join(&file_name);

        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            return Err(Error::AlreadyExists { path: dest });
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists { path: dest })
            }
            Err(e) => return Err(Error::storage(&dest, e)),
        };

        let mut written: u64 = 0;
        let streamed = async {
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk)
                    .await
                    .map_err(|e| Error::storage(&dest, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| Error::storage(&dest, e))?;
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = streamed {
            drop(file);
            remove_partial(&dest).await;
            return Err(e);
        }

        debug!("Saved {} ({} bytes)", dest.display(), written);
        Ok(SavedFile {
            file_name,
            size_bytes: written,
        })
    }
}

fn file_name_of(path: &Path, sequence_number: u32) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| fallback_filename(sequence_number))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove partial file {}: {}", path.display(), e);
    }
}
