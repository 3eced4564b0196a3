//! HTTP client for the PNCP file API.

mod response;
mod user_agent;

pub use response::{parse_content_disposition_filename, HttpResponse};
pub use user_agent::{resolve_user_agent, IMPERSONATE_USER_AGENTS, USER_AGENT};

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

/// Thin wrapper over a shared reqwest client.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client.
    ///
    /// `timeout` bounds connecting and each read, not the whole transfer, so
    /// large files on slow links still complete.
    /// - None: Use default atacquire user agent
    /// - Some("impersonate"): Use random real browser user agent
    /// - Some(custom): Use custom user agent string
    pub fn new(timeout: Duration, user_agent_config: Option<&str>) -> Result<Self, reqwest::Error> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self { client })
    }

    /// Make a GET request. Non-2xx statuses are returned, not turned into errors.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        debug!("GET {}", url);
        let response = self.client.get(url).send().await?;
        debug!("GET {} -> {}", url, response.status());
        Ok(HttpResponse::from_response(response))
    }
}
