//! URL construction for the PNCP portal and its file API.

use crate::error::{Error, Result};
use crate::models::{RecordIdentifier, SearchFilters};

/// Fixed page size used both as request parameter and "page is full" heuristic.
pub const PAGE_SIZE: usize = 333;

pub const DEFAULT_PORTAL_URL: &str = "https://pncp.gov.br";
pub const DEFAULT_API_URL: &str = "https://pncp.gov.br/pncp-api/v1";

/// Sphere names to portal codes.
const SPHERE_CODES: &[(&str, &str)] = &[
    ("estadual", "E"),
    ("municipal", "M"),
    ("distrital", "D"),
    ("federal", "F"),
];

/// Status names to portal codes.
const STATUS_CODES: &[(&str, &str)] = &[
    ("vigente", "vigente"),
    ("não vigente", "nao_vigente"),
    ("nao vigente", "nao_vigente"),
];

/// Organ names to portal codes.
const ORGAN_CODES: &[(&str, &str)] = &[("ministerio da justica e seguranca publica", "45877")];

/// Look up a value case-insensitively, passing unknown values through verbatim.
fn map_code(table: &[(&str, &str)], value: &str) -> String {
    let key = value.trim().to_lowercase();
    table
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| value.trim().to_string())
}

/// Join mapped codes with `|` and percent-encode the result.
fn joined_codes<'a>(values: impl IntoIterator<Item = &'a String>, table: &[(&str, &str)]) -> String {
    let codes: Vec<String> = values
        .into_iter()
        .filter(|v| !v.trim().is_empty())
        .map(|v| map_code(table, v))
        .collect();
    urlencoding::encode(&codes.join("|")).into_owned()
}

/// Base URLs of the portal and its API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalUrls {
    portal_url: String,
    api_url: String,
}

impl Default for PortalUrls {
    fn default() -> Self {
        Self::new(DEFAULT_PORTAL_URL, DEFAULT_API_URL)
    }
}

impl PortalUrls {
    pub fn new(portal_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into().trim_end_matches('/').to_string(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn portal_url(&self) -> &str {
        &self.portal_url
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Public detail page of a record.
    pub fn public_url(&self, id: &RecordIdentifier) -> String {
        format!(
            "{}/app/atas/{}/{}/{}/{}",
            self.portal_url, id.org_code, id.year, id.acquisition_number, id.sequence
        )
    }

    /// Binary download URL of the `file_seq`-th file of a record.
    pub fn file_url(&self, id: &RecordIdentifier, file_seq: u32) -> String {
        format!(
            "{}/orgaos/{}/compras/{}/{}/atas/{}/arquivos/{}",
            self.api_url, id.org_code, id.year, id.acquisition_number, id.sequence, file_seq
        )
    }

    /// Search results page `page` (1-based) for `term` with `filters`.
    pub fn search_url(&self, term: &str, page: u32, filters: &SearchFilters) -> Result<String> {
        let term = term.trim();
        if term.is_empty() {
            return Err(Error::MissingSearchTerm);
        }

        let mut params = vec![
            format!("q={}", urlencoding::encode(term)),
            format!("pagina={page}"),
            format!("tam_pagina={PAGE_SIZE}"),
        ];

        if filters.spheres.iter().any(|s| !s.trim().is_empty()) {
            params.push(format!("esferas={}", joined_codes(&filters.spheres, SPHERE_CODES)));
        }
        if filters.states.iter().any(|s| !s.trim().is_empty()) {
            params.push(format!("ufs={}", joined_codes(&filters.states, &[])));
        }
        if let Some(status) = filters.status.as_deref().filter(|s| !s.trim().is_empty()) {
            let code = map_code(STATUS_CODES, status).to_lowercase();
            params.push(format!("status={}", urlencoding::encode(&code)));
        }
        if filters.organs.iter().any(|s| !s.trim().is_empty()) {
            params.push(format!("orgaos={}", joined_codes(&filters.organs, ORGAN_CODES)));
        }

        Ok(format!("{}/app/atas?{}", self.portal_url, params.join("&")))
    }
}
