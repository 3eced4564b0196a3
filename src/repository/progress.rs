//! Durable record of download outcomes, kept as `.progress.json` in the
//! download root.
//!
//! The store is the single source of truth for "already processed" checks.
//! A missing or corrupt file loads as an empty store; only `save` and `clear`
//! report I/O failures.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{RecordIdentifier, RecordOutcome};
use crate::storage::write_atomic;

/// Progress file name inside the download root.
pub const PROGRESS_FILE: &str = ".progress.json";

/// Persisted store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    #[serde(default)]
    pub records: Vec<RecordOutcome>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Derived counters over the stored outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressStatistics {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_files: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Progress store bound to one download root.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    state: ProgressState,
}

impl ProgressStore {
    /// Bind to `root` and load whatever is on disk.
    pub fn open(root: &Path) -> Self {
        let mut store = Self {
            path: root.join(PROGRESS_FILE),
            state: ProgressState::default(),
        };
        store.load();
        store
    }

    /// Discard in-memory state and reload from a new root.
    pub fn reinitialize(&mut self, root: &Path) {
        info!("Reinitializing progress store at {}", root.display());
        self.path = root.join(PROGRESS_FILE);
        self.state = ProgressState::default();
        self.load();
    }

    /// Reload state from disk. Read and parse failures yield an empty store.
    pub fn load(&mut self) -> &ProgressState {
        self.state = match std::fs::read_to_string(&self.path) {
            Ok(contents) => match serde_json::from_str::<ProgressState>(&contents) {
                Ok(state) => normalize(state),
                Err(e) => {
                    warn!(
                        "Progress file {} is unreadable, starting fresh: {}",
                        self.path.display(),
                        e
                    );
                    ProgressState::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProgressState::default(),
            Err(e) => {
                warn!(
                    "Could not read progress file {}, starting fresh: {}",
                    self.path.display(),
                    e
                );
                ProgressState::default()
            }
        };
        debug!(
            "Loaded {} record(s) from {}",
            self.state.records.len(),
            self.path.display()
        );
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    pub fn records(&self) -> &[RecordOutcome] {
        &self.state.records
    }

    /// True only when a successful outcome is stored for `id`.
    pub fn is_processed(&self, id: &str) -> bool {
        self.get_outcome(id).is_some_and(|o| o.success)
    }

    pub fn get_outcome(&self, id: &str) -> Option<&RecordOutcome> {
        let key = RecordIdentifier::canonicalize(id);
        self.state.records.iter().find(|r| r.identifier == key)
    }

    /// Insert or replace the outcome for its identifier. Other entries keep their order.
    pub fn upsert(&mut self, mut outcome: RecordOutcome) {
        outcome.identifier = RecordIdentifier::canonicalize(&outcome.identifier);
        match self
            .state
            .records
            .iter_mut()
            .find(|r| r.identifier == outcome.identifier)
        {
            Some(existing) => *existing = outcome,
            None => self.state.records.push(outcome),
        }
    }

    /// Persist the full state atomically, stamping `lastUpdated`.
    pub fn save(&mut self) -> Result<()> {
        self.state.last_updated = Some(Utc::now());
        let bytes = serde_json::to_vec_pretty(&self.state)?;
        write_atomic(&self.path, &bytes)?;
        debug!(
            "Saved {} record(s) to {}",
            self.state.records.len(),
            self.path.display()
        );
        Ok(())
    }

    pub fn statistics(&self) -> ProgressStatistics {
        let records = &self.state.records;
        let succeeded = records.iter().filter(|r| r.success).count();
        ProgressStatistics {
            total: records.len(),
            succeeded,
            failed: records.len() - succeeded,
            total_files: records.iter().map(|r| r.files.len()).sum(),
            last_updated: self.state.last_updated,
        }
    }

    /// Identifiers of successfully processed records.
    pub fn processed_ids(&self) -> HashSet<String> {
        self.state
            .records
            .iter()
            .filter(|r| r.success)
            .map(|r| r.identifier.clone())
            .collect()
    }

    /// Delete the progress file and empty the in-memory state.
    pub fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Progress cleared: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(&self.path, e)),
        }
        self.state = ProgressState::default();
        Ok(())
    }
}

/// Canonicalize identifiers and collapse duplicates, later entries winning.
fn normalize(state: ProgressState) -> ProgressState {
    let mut records: Vec<RecordOutcome> = Vec::with_capacity(state.records.len());
    for mut record in state.records {
        record.identifier = RecordIdentifier::canonicalize(&record.identifier);
        match records.iter_mut().find(|r| r.identifier == record.identifier) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }
    ProgressState {
        records,
        last_updated: state.last_updated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DestinationTag, DownloadedFile};
    use tempfile::TempDir;

    fn file(n: u32) -> DownloadedFile {
        DownloadedFile {
            sequence_number: n,
            file_name: format!("ata_{n}.pdf"),
            size_bytes: 100,
            destination_tags: vec![DestinationTag::Organized],
            already_existed: false,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::open(dir.path());
        assert!(store.records().is_empty());
        assert_eq!(store.path(), dir.path().join(PROGRESS_FILE));
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(PROGRESS_FILE), "{not json").unwrap();
        let store = ProgressStore::open(dir.path());
        assert!(store.records().is_empty());
        assert_eq!(store.statistics(), ProgressStatistics::default());
    }

    #[test]
    fn failed_records_are_not_processed() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path());
        store.upsert(RecordOutcome::failed("1-2-3/2024-4", "no files found"));
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-5", vec![file(1)]));

        assert!(!store.is_processed("1-2-3/2024-4"));
        assert!(store.get_outcome("1-2-3/2024-4").is_some());
        assert!(store.is_processed("1-2-3/2024-5"));
        assert!(!store.is_processed("9-9-9/2024-9"));
    }

    #[test]
    fn upsert_replaces_in_place_and_canonicalizes() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path());
        store.upsert(RecordOutcome::failed("1-2-03/2024-4", "boom"));
        store.upsert(RecordOutcome::succeeded("7-7-7/2024-7", vec![]));
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-04", vec![file(1)]));

        let ids: Vec<_> = store.records().iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["1-2-3/2024-4", "7-7-7/2024-7"]);
        assert!(store.is_processed("1-2-003/2024-4"));
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path());
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-4", vec![file(1), file(2)]));
        store.upsert(RecordOutcome::failed("1-2-3/2024-5", "no files found"));
        store.save().unwrap();

        let reopened = ProgressStore::open(dir.path());
        let stats = reopened.statistics();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total_files, 2);
        assert!(stats.last_updated.is_some());
        assert_eq!(
            reopened.processed_ids(),
            HashSet::from(["1-2-3/2024-4".to_string()])
        );
    }

    #[test]
    fn persisted_json_uses_camel_case() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path());
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-4", vec![file(1)]));
        store.save().unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value["lastUpdated"].is_string());
        assert_eq!(value["records"][0]["files"][0]["fileName"], "ata_1.pdf");
    }

    #[test]
    fn duplicate_entries_on_disk_collapse_on_load() {
        let dir = TempDir::new().unwrap();
        let json = r#"{
            "records": [
                {"identifier": "1-2-03/2024-4", "success": false, "timestamp": "2024-01-01T00:00:00Z"},
                {"identifier": "1-2-3/2024-4", "timestamp": "2024-01-02T00:00:00Z"}
            ],
            "lastUpdated": null
        }"#;
        std::fs::write(dir.path().join(PROGRESS_FILE), json).unwrap();

        let store = ProgressStore::open(dir.path());
        assert_eq!(store.records().len(), 1);
        assert!(store.is_processed("1-2-3/2024-4"));
    }

    #[test]
    fn clear_removes_file_and_state() {
        let dir = TempDir::new().unwrap();
        let mut store = ProgressStore::open(dir.path());
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-4", vec![]));
        store.save().unwrap();
        assert!(store.path().exists());

        store.clear().unwrap();
        assert!(!store.path().exists());
        assert!(store.records().is_empty());
        store.clear().unwrap();
    }

    #[test]
    fn reinitialize_switches_roots() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let mut store = ProgressStore::open(first.path());
        store.upsert(RecordOutcome::succeeded("1-2-3/2024-4", vec![]));
        store.save().unwrap();

        store.reinitialize(second.path());
        assert!(store.records().is_empty());
        assert_eq!(store.path(), second.path().join(PROGRESS_FILE));

        store.reinitialize(first.path());
        assert_eq!(store.records().len(), 1);
    }
}
