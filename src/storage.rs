//! Download destinations on disk.
//!
//! A record's files land in the flat download root (`direct`), in a numbered
//! per-record subfolder (`organized`), or in both. Subfolders are named
//! `{counter:04}-{identifier}` where the counter is persisted in the root so
//! numbering keeps increasing across runs.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::OrganizationMode;
use crate::error::{Error, Result};
use crate::models::{DestinationTag, RecordIdentifier};

/// Counter file kept inside the download root.
pub const FOLDER_COUNTER_FILE: &str = ".folder-counter.json";

const MAX_FILENAME_CHARS: usize = 200;
const MAX_FOLDER_CHARS: usize = 100;

static ILLEGAL_PATH_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static WHITESPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_{2,}").unwrap());

/// Make a server-supplied filename safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = ILLEGAL_PATH_CHARS.replace_all(name.trim(), "_");
    let cleaned = WHITESPACE_RUNS.replace_all(&cleaned, "_");
    let cleaned = UNDERSCORE_RUNS.replace_all(&cleaned, "_");
    cleaned.chars().take(MAX_FILENAME_CHARS).collect()
}

/// Folder-name variant: same character policy, shorter cap, no underscore collapse.
pub fn sanitize_folder_name(name: &str) -> String {
    let cleaned = ILLEGAL_PATH_CHARS.replace_all(name.trim(), "_");
    let cleaned = WHITESPACE_RUNS.replace_all(&cleaned, "_");
    cleaned.chars().take(MAX_FOLDER_CHARS).collect()
}

/// Name used when the response carries no usable filename.
pub fn fallback_filename(sequence_number: u32) -> String {
    format!("file_{sequence_number}.pdf")
}

/// Create the directory (and parents) or report the root as unavailable.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| Error::storage(dir, e))
}

/// Write `bytes` to `path` through a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(dir)?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| Error::storage(dir, e))?;
    tmp.write_all(bytes).map_err(|e| Error::storage(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| Error::storage(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| Error::storage(path, e.error))?;
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CounterState {
    counter: u32,
}

/// Persistent, monotonically increasing counter for organized folder names.
#[derive(Debug, Clone)]
pub struct FolderCounter {
    path: PathBuf,
}

impl FolderCounter {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(FOLDER_COUNTER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last allocated value. Missing or unreadable state counts as 0.
    pub fn current(&self) -> u32 {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str::<CounterState>(&s).ok())
            .map(|s| s.counter)
            .unwrap_or(0)
    }

    /// Allocate the next value and return it zero-padded to four digits.
    pub fn next(&self) -> Result<String> {
        let counter = self.current().saturating_add(1);
        self.store(counter)?;
        Ok(format!("{counter:04}"))
    }

    pub fn reset(&self) -> Result<()> {
        self.store(0)
    }

    fn store(&self, counter: u32) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&CounterState { counter })?;
        write_atomic(&self.path, &bytes)
    }
}

/// Resolved destination directories for one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationDirs {
    pub direct: Option<PathBuf>,
    pub organized: Option<PathBuf>,
}

impl DestinationDirs {
    /// Resolve destinations for `id` under `root`, creating them on disk.
    ///
    /// The folder counter is only advanced when an organized folder is needed.
    pub fn resolve(
        root: &Path,
        mode: OrganizationMode,
        id: &RecordIdentifier,
        counter: &FolderCounter,
    ) -> Result<Self> {
        ensure_dir(root)?;
        let mut dirs = Self::default();

        if mode.includes_direct() {
            dirs.direct = Some(root.to_path_buf());
        }

        if mode.includes_organized() {
            let number = counter.next()?;
            let name = sanitize_folder_name(&format!("{number}-{}", id.folder_fragment()));
            let folder = root.join(name);
            ensure_dir(&folder)?;
            debug!("Organized folder for {}: {}", id, folder.display());
            dirs.organized = Some(folder);
        }

        Ok(dirs)
    }

    /// Destinations in fixed order: direct first, then organized.
    pub fn iter(&self) -> impl Iterator<Item = (DestinationTag, &Path)> {
        self.direct
            .as_deref()
            .map(|p| (DestinationTag::Direct, p))
            .into_iter()
            .chain(
                self.organized
                    .as_deref()
                    .map(|p| (DestinationTag::Organized, p)),
            )
    }

    /// Folder reported in outcomes: the organized one when present.
    pub fn storage_folder(&self) -> Option<String> {
        self.organized
            .as_ref()
            .or(self.direct.as_ref())
            .map(|p| p.display().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_none() && self.organized.is_none()
    }
}
