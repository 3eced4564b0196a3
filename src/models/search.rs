//! Search result items and filters.

use serde::{Deserialize, Serialize};

/// Subject text used when a result card has no value for a field.
pub const NOT_INFORMED: &str = "Not informed";

/// Default status filter applied to every search.
pub const DEFAULT_STATUS: &str = "vigente";

/// One discovered record. Identity for deduplication is `identifier` alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub identifier: String,
    pub display_number: String,
    #[serde(default = "not_informed")]
    pub org_name: String,
    #[serde(default = "not_informed")]
    pub subject_text: String,
}

fn not_informed() -> String {
    NOT_INFORMED.to_string()
}

impl SearchResultItem {
    pub fn new(
        identifier: impl Into<String>,
        display_number: impl Into<String>,
        org_name: Option<String>,
        subject_text: Option<String>,
    ) -> Self {
        let or_default = |value: Option<String>| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(not_informed)
        };
        Self {
            identifier: identifier.into().trim().to_string(),
            display_number: display_number.into().trim().to_string(),
            org_name: or_default(org_name),
            subject_text: or_default(subject_text),
        }
    }
}

/// Filters applied to a search. Values are human-readable names, mapped to
/// portal codes when the search URL is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Government spheres (federal, estadual, municipal, distrital).
    pub spheres: Vec<String>,
    /// Federative units (UF codes such as `SP`).
    pub states: Vec<String>,
    pub status: Option<String>,
    /// Organ names or numeric organ codes.
    pub organs: Vec<String>,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            spheres: Vec::new(),
            states: Vec::new(),
            status: Some(DEFAULT_STATUS.to_string()),
            organs: Vec::new(),
        }
    }
}
