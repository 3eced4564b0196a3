//! Persistence layer.
//!
//! Download state lives in a single JSON document inside the download root.

pub mod progress;

pub use progress::{ProgressState, ProgressStatistics, ProgressStore, PROGRESS_FILE};
