//! HTTP response wrapper.

use std::collections::HashMap;
use std::sync::LazyLock;

use bytes::Bytes;
use regex::Regex;
use reqwest::{Response, StatusCode};

static FILENAME_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename="?([^";\n]+)"?"#).unwrap());

/// HTTP response wrapper.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HashMap<String, String>,
    pub(crate) response: Response,
}

impl HttpResponse {
    pub(crate) fn from_response(response: Response) -> Self {
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        Self {
            status,
            headers,
            response,
        }
    }

    /// Get the filename from Content-Disposition header.
    pub fn content_disposition_filename(&self) -> Option<String> {
        self.headers
            .get("content-disposition")
            .and_then(|h| parse_content_disposition_filename(h))
    }

    /// Next chunk of the body, `None` once the body is exhausted.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, reqwest::Error> {
        self.response.chunk().await
    }
}

/// Parse filename from Content-Disposition header value.
/// Parses both `filename="name.pdf"` and `filename*=UTF-8''name.pdf` formats.
pub fn parse_content_disposition_filename(header: &str) -> Option<String> {
    // Try filename*= first (RFC 5987 encoded)
    if let Some(start) = header.find("filename*=") {
        let rest = &header[start + 10..];
        if let Some(quote_start) = rest.find("''") {
            let encoded = rest[quote_start + 2..].split([';', ' ']).next()?;
            if let Ok(decoded) = urlencoding::decode(encoded) {
                let filename = decoded.trim().to_string();
                if !filename.is_empty() {
                    return Some(filename);
                }
            }
        }
    }

    // Plain filename=, quoted or not; unquoted values may contain spaces
    FILENAME_PARAM
        .captures(header)
        .map(|caps| caps[1].trim().to_string())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_content_disposition_quoted() {
        let header = r#"attachment; filename="document.pdf""#;
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("document.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_unquoted_with_spaces() {
        let header = "attachment; filename=Ata de Registro.pdf; size=10";
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("Ata de Registro.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_case_insensitive() {
        let header = r#"attachment; FILENAME="ATA.PDF""#;
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("ATA.PDF".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_rfc5987() {
        let header = "attachment; filename*=UTF-8''my%20document.pdf";
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("my document.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_both_formats() {
        // RFC 5987 should take precedence
        let header = r#"attachment; filename="fallback.pdf"; filename*=UTF-8''preferred.pdf"#;
        assert_eq!(
            parse_content_disposition_filename(header),
            Some("preferred.pdf".to_string())
        );
    }

    #[test]
    fn test_parse_content_disposition_none() {
        assert_eq!(parse_content_disposition_filename("attachment"), None);
        assert_eq!(parse_content_disposition_filename("inline"), None);
        assert_eq!(parse_content_disposition_filename(r#"attachment; filename="""#), None);
    }
}
