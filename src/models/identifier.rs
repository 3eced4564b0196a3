//! Composite record identifier (`org-modality-acquisition/year-sequence`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

static IDENTIFIER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)-(\d+)/(\d{4})-(\d+)$").unwrap());

/// Identifier of one procurement-minutes record as published by the portal.
///
/// `acquisition_number` and `sequence` are kept as digit strings with their
/// leading zeros dropped on parse, so any length round-trips. `org_code` and
/// `modality` stay verbatim: the portal routes on them as strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentifier {
    pub org_code: String,
    pub modality: String,
    pub acquisition_number: String,
    pub year: String,
    pub sequence: String,
}

impl RecordIdentifier {
    /// Parse a raw identifier. Surrounding whitespace is ignored.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let caps = IDENTIFIER_PATTERN
            .captures(trimmed)
            .ok_or_else(|| Error::InvalidIdentifierFormat(raw.to_string()))?;

        Ok(Self {
            org_code: caps[1].to_string(),
            modality: caps[2].to_string(),
            acquisition_number: strip_leading_zeros(&caps[3]),
            year: caps[4].to_string(),
            sequence: strip_leading_zeros(&caps[5]),
        })
    }

    /// Canonical string form with leading zeros stripped from the numeric parts.
    pub fn format(&self) -> String {
        self.to_string()
    }

    /// Canonicalise a raw identifier if it parses, otherwise return it trimmed.
    pub fn canonicalize(raw: &str) -> String {
        match Self::parse(raw) {
            Ok(id) => id.format(),
            Err(_) => raw.trim().to_string(),
        }
    }

    /// Identifier rendered for use as a single path component.
    pub fn folder_fragment(&self) -> String {
        self.format().replace('/', "-")
    }
}

fn strip_leading_zeros(digits: &str) -> String {
    match digits.trim_start_matches('0') {
        "" => "0".to_string(),
        rest => rest.to_string(),
    }
}

impl fmt::Display for RecordIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}/{}-{}",
            self.org_code, self.modality, self.acquisition_number, self.year, self.sequence
        )
    }
}

impl FromStr for RecordIdentifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RecordIdentifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.format())
    }
}

impl<'de> Deserialize<'de> for RecordIdentifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
