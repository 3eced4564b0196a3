//! Service layer: record downloads and the audit log.

pub mod audit_log;
pub mod download;

pub use audit_log::{AuditLog, LogLevel};
pub use download::{
    BatchDownloader, BatchProgress, BatchRecord, BatchResult, BatchStatus, DownloadEvent,
    RecordDownload, RecordDownloader, RecordState,
};
