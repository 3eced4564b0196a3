//! Data models for atacquire.

mod identifier;
mod record;
mod search;

pub use identifier::RecordIdentifier;
pub use record::{DestinationTag, DownloadedFile, RecordOutcome};
pub use search::{SearchFilters, SearchResultItem, DEFAULT_STATUS, NOT_INFORMED};
