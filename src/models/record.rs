//! Persisted download outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which configured layout received a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationTag {
    /// Flat download root.
    Direct,
    /// Per-record subfolder.
    Organized,
}

impl DestinationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Organized => "organized",
        }
    }
}

/// One file of a record's file sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedFile {
    /// 1-based position within the record's file sequence.
    pub sequence_number: u32,
    pub file_name: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub destination_tags: Vec<DestinationTag>,
    #[serde(default)]
    pub already_existed: bool,
}

fn default_success() -> bool {
    true
}

/// Result of one record's download attempt. At most one per identifier lives
/// in the progress store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordOutcome {
    pub identifier: String,
    #[serde(default)]
    pub display_number: Option<String>,
    #[serde(default)]
    pub public_link: Option<String>,
    #[serde(default)]
    pub storage_folder: Option<String>,
    #[serde(default)]
    pub files: Vec<DownloadedFile>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecordOutcome {
    /// Successful outcome with the given files.
    pub fn succeeded(identifier: impl Into<String>, files: Vec<DownloadedFile>) -> Self {
        Self {
            identifier: identifier.into(),
            display_number: None,
            public_link: None,
            storage_folder: None,
            files,
            success: true,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    /// Failed outcome carrying an error message.
    pub fn failed(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Self::succeeded(identifier, Vec::new())
        }
    }

    pub fn with_display_number(mut self, label: Option<String>) -> Self {
        self.display_number = label;
        self
    }

    pub fn with_public_link(mut self, link: Option<String>) -> Self {
        self.public_link = link;
        self
    }

    pub fn with_storage_folder(mut self, folder: Option<String>) -> Self {
        self.storage_folder = folder;
        self
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_success_defaults_to_true() {
        let json = r#"{"identifier":"1-2-3/2024-4","timestamp":"2024-05-01T12:00:00Z"}"#;
        let outcome: RecordOutcome = serde_json::from_str(json).unwrap();
        assert!(outcome.success);
        assert!(outcome.files.is_empty());
        assert!(outcome.error_message.is_none());
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let outcome = RecordOutcome::succeeded(
            "1-2-3/2024-4",
            vec![DownloadedFile {
                sequence_number: 1,
                file_name: "ata.pdf".into(),
                size_bytes: 10,
                destination_tags: vec![DestinationTag::Organized],
                already_existed: false,
            }],
        )
        .with_display_number(Some("Ata nº 4/2024".into()));

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["displayNumber"], "Ata nº 4/2024");
        assert_eq!(value["files"][0]["sequenceNumber"], 1);
        assert_eq!(value["files"][0]["destinationTags"][0], "organized");
        assert_eq!(value["errorMessage"], serde_json::Value::Null);
    }

    #[test]
    fn failed_outcome_has_message_and_no_files() {
        let outcome = RecordOutcome::failed("x", "no files found");
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("no files found"));
        assert_eq!(outcome.total_bytes(), 0);
    }
}
