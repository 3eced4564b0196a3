//! Human-readable audit trail of download outcomes.
//!
//! One file per run, `log-download-<timestamp>.txt` in the download root.
//! Lines are buffered and appended in chunks; warnings and errors are written
//! through immediately. Write failures are reported via `tracing` and never
//! interrupt a download.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat, Utc};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::models::RecordOutcome;
use crate::repository::ProgressStatistics;
use crate::utils::format_size;

/// Buffered lines that trigger a flush.
const FLUSH_THRESHOLD: usize = 50;

/// Lines kept while the file cannot be written; older ones are dropped.
const MAX_BUFFERED_LINES: usize = 1000;

const HEAVY_RULE: &str = "===============================================================";
const LIGHT_RULE: &str = "---------------------------------------------------------------";

/// Severity of a free-form log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    fn marker(&self) -> &'static str {
        match self {
            Self::Info => "->",
            Self::Warning => "!!",
            Self::Error => "xx",
            Self::Success => "ok",
        }
    }

    fn flushes_immediately(&self) -> bool {
        matches!(self, Self::Warning | Self::Error)
    }
}

/// Append-only log writer bound to one download root.
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    buffer: Vec<String>,
}

/// File name for a log started now.
pub fn log_file_name() -> String {
    let stamp = Utc::now()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("log-download-{stamp}.txt")
}

impl AuditLog {
    /// Create a new log file in `root` and write its header.
    pub fn create(root: &Path) -> Result<Self> {
        let path = root.join(log_file_name());
        let header = [
            HEAVY_RULE.to_string(),
            "  DOWNLOAD LOG - PNCP PROCUREMENT MINUTES".to_string(),
            HEAVY_RULE.to_string(),
            format!("  Started: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            format!("  Directory: {}", root.display()),
            HEAVY_RULE.to_string(),
            String::new(),
            String::new(),
        ]
        .join("\n");

        std::fs::write(&path, header).map_err(|e| Error::storage(&path, e))?;
        debug!("Audit log initialized: {}", path.display());

        Ok(Self {
            path,
            buffer: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record section built from a read-only snapshot of `outcome`.
    pub fn record(&mut self, outcome: &RecordOutcome) {
        let mut lines = vec![LIGHT_RULE.to_string()];
        lines.push(format!("Record: {}", outcome.identifier));

        if let Some(ref folder) = outcome.storage_folder {
            lines.push(format!("Folder: {folder}"));
        }
        lines.push(format!(
            "   Link: {}",
            outcome.public_link.as_deref().unwrap_or("n/a")
        ));
        if let Some(ref label) = outcome.display_number {
            lines.push(format!("   Number: {label}"));
        }

        if !outcome.files.is_empty() {
            for (index, file) in outcome.files.iter().enumerate() {
                let mut line = format!("  {:<5}{}", format!("[{}]", index + 1), file.file_name);
                if file.size_bytes > 0 {
                    line.push_str(&format!(" ({})", format_size(file.size_bytes)));
                }
                if file.already_existed {
                    line.push_str(" [already existed]");
                }
                lines.push(line);
            }
            lines.push(format!(
                "    Summary: {} file(s), {}",
                outcome.files.len(),
                format_size(outcome.total_bytes())
            ));
        } else if outcome.success {
            lines.push("  [1] No files for this record".to_string());
        }

        if !outcome.success {
            lines.push(format!(
                "  [!] ERROR: {}",
                outcome
                    .error_message
                    .as_deref()
                    .unwrap_or("processing failed")
            ));
        }

        lines.push(String::new());
        self.buffer.extend(lines);

        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Append a timestamped free-form message.
    pub fn message(&mut self, text: &str, level: LogLevel) {
        let time = Local::now().format("%H:%M:%S");
        self.buffer
            .push(format!("[{time}] {} {text}", level.marker()));
        if level.flushes_immediately() || self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush();
        }
    }

    /// Append the end-of-run statistics block and flush.
    pub fn statistics(&mut self, stats: &ProgressStatistics) {
        self.buffer.extend([
            String::new(),
            HEAVY_RULE.to_string(),
            "  FINAL STATISTICS".to_string(),
            HEAVY_RULE.to_string(),
            format!("  Records processed: {}", stats.total),
            format!("  Records succeeded: {}", stats.succeeded),
            format!("  Records failed: {}", stats.failed),
            format!("  Files downloaded: {}", stats.total_files),
            format!("  Finished: {}", Local::now().format("%Y-%m-%d %H:%M:%S")),
            HEAVY_RULE.to_string(),
            String::new(),
        ]);
        self.flush();
    }

    /// Write buffered lines to disk. On failure the lines stay buffered, up
    /// to `MAX_BUFFERED_LINES`.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let mut chunk = self.buffer.join("\n");
        chunk.push('\n');

        let result = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(chunk.as_bytes()));

        match result {
            Ok(()) => self.buffer.clear(),
            Err(e) => {
                error!("Failed to write audit log {}: {}", self.path.display(), e);
                if self.buffer.len() > MAX_BUFFERED_LINES {
                    let dropped = self.buffer.len() - MAX_BUFFERED_LINES;
                    self.buffer.drain(..dropped);
                    error!("Dropped {} unwritten audit log line(s)", dropped);
                }
            }
        }
    }

    /// Flush and return the log path.
    pub fn finish(&mut self) -> PathBuf {
        self.flush();
        debug!("Audit log finished: {}", self.path.display());
        self.path.clone()
    }

    #[cfg(test)]
    pub(crate) fn buffered_lines(&self) -> usize {
        self.buffer.len()
    }
}

impl Drop for AuditLog {
    fn drop(&mut self) {
        self.flush();
    }
}
