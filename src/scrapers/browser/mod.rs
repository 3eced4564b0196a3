//! Headless browser session for the portal's client-rendered search pages.
//!
//! One Chromium instance (launched locally or reached over CDP) is shared by
//! every page of a crawl. Each page gets its own tab, which is closed on every
//! path once the page has been read.

mod config;

pub use config::BrowserEngineConfig;

#[cfg(feature = "browser")]
use std::path::PathBuf;
#[cfg(feature = "browser")]
use std::time::Duration;

use async_trait::async_trait;
#[cfg(feature = "browser")]
use tracing::{debug, info, warn};

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig, Page};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
#[cfg(feature = "browser")]
use crate::scrapers::http_client::IMPERSONATE_USER_AGENTS;
use crate::scrapers::search::{PageResult, ResultPageSource};
#[cfg(feature = "browser")]
use crate::scrapers::search::extract;

#[cfg(feature = "browser")]
const MARKER_SELECTOR: &str = "strong";

#[cfg(feature = "browser")]
const MARKER_POLL: Duration = Duration::from_millis(250);

#[cfg(feature = "browser")]
fn browser_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::Browser(format!("{context}: {e}"))
}

/// Headless browser that renders search result pages.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    config: BrowserEngineConfig,
    user_agent: String,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
}

#[cfg(feature = "browser")]
impl BrowserFetcher {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    /// Create a fetcher. The browser is started on the first page request.
    ///
    /// Without a configured user agent a desktop Chrome one is used, since the
    /// portal serves its search app only to regular browsers.
    pub fn new(config: BrowserEngineConfig, user_agent: Option<&str>) -> Self {
        let user_agent = user_agent
            .map(str::trim)
            .filter(|ua| !ua.is_empty() && !ua.eq_ignore_ascii_case("impersonate"))
            .unwrap_or(IMPERSONATE_USER_AGENTS[0])
            .to_string();
        Self {
            config,
            user_agent,
            browser: None,
            handler: None,
        }
    }

    fn find_chrome() -> Result<PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(PathBuf::from(path));
                    }
                }
            }
        }

        Err(Error::Browser(
            "Chrome/Chromium not found. Install it or set BROWSER_URL to a running instance:\n\
             - Ubuntu/Debian: sudo apt install chromium-browser\n\
             - Fedora: sudo dnf install chromium\n\
             - Arch/Manjaro: sudo pacman -S chromium"
                .to_string(),
        ))
    }

    /// Launch or connect to the browser if not already running.
    pub async fn ensure_browser(&mut self) -> Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);
        let mut builder = BrowserConfig::builder()
            .chrome_executable(Self::find_chrome()?)
            .request_timeout(Duration::from_secs(self.config.timeout));

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-sync")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| browser_error("Failed to build browser config", e))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| browser_error("Failed to launch browser", e))?;

        self.attach(browser, handler);
        Ok(())
    }

    /// Connect to a remote Chrome instance through its DevTools endpoint.
    async fn connect_remote(&mut self, url: &str) -> Result<()> {
        info!(
            "Connecting to remote browser at {} (timeout: {}s)",
            url, self.config.timeout
        );

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await?
            .json()
            .await?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Browser("No webSocketDebuggerUrl in response".to_string()))?;

        debug!("Connecting to WebSocket: {}", ws_url);

        let handler_config = chromiumoxide::handler::HandlerConfig {
            request_timeout: Duration::from_secs(self.config.timeout),
            ..Default::default()
        };

        let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
            .await
            .map_err(|e| browser_error("Failed to connect to remote browser", e))?;

        self.attach(browser, handler);
        Ok(())
    }

    fn attach(&mut self, browser: Browser, mut handler: chromiumoxide::handler::Handler) {
        let task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });
        self.browser = Some(browser);
        self.handler = Some(task);
    }

    /// Open `url` in a fresh tab and return what rendered.
    async fn fetch_rendered(&mut self, url: &str) -> Result<PageResult> {
        self.ensure_browser().await?;
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| Error::Browser("browser is not running".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| browser_error("Failed to open tab", e))?;

        let result = self.render(&page, url).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close tab: {}", e);
        }
        result
    }

    async fn render(&self, page: &Page, url: &str) -> Result<PageResult> {
        page.execute(SetUserAgentOverrideParams::new(self.user_agent.clone()))
            .await
            .map_err(|e| browser_error("Failed to set user agent", e))?;

        debug!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| browser_error("Invalid URL", e))?;

        let navigation = tokio::time::timeout(
            Duration::from_secs(self.config.timeout),
            page.execute(nav_params),
        )
        .await
        .map_err(|_| Error::Browser(format!("Timed out navigating to {url}")))?;
        let navigation = navigation.map_err(|e| browser_error("Navigation failed", e))?;
        if let Some(error_text) = navigation.result.error_text.as_deref() {
            return Err(Error::Browser(format!("Navigation failed: {error_text}")));
        }

        let marker_wait = Duration::from_secs(self.config.marker_wait_secs);
        let markers = tokio::time::timeout(marker_wait, async {
            while page.find_element(MARKER_SELECTOR).await.is_err() {
                tokio::time::sleep(MARKER_POLL).await;
            }
        })
        .await;

        if markers.is_err() {
            if let Ok(content) = page.content().await {
                if is_rate_limit_page(&content) {
                    return Err(Error::RateLimited);
                }
            }
            warn!("No result markers after {:?} on {}", marker_wait, url);
            return Ok(PageResult::unrendered());
        }

        tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;

        let content = page
            .content()
            .await
            .map_err(|e| browser_error("Failed to read page", e))?;

        if is_rate_limit_page(&content) {
            return Err(Error::RateLimited);
        }

        let items = extract::extract_records(&content);
        debug!("Extracted {} record(s) from {}", items.len(), url);
        Ok(PageResult::from_items(items))
    }

    /// Close the browser.
    pub async fn close(&mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("Failed to close browser: {}", e);
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl ResultPageSource for BrowserFetcher {
    async fn fetch_page(&mut self, url: &str) -> Result<PageResult> {
        self.fetch_rendered(url).await
    }

    async fn close(&mut self) {
        BrowserFetcher::close(self).await;
    }
}

/// Whether a rendered page is the server's 429 error page.
#[cfg_attr(not(feature = "browser"), allow(dead_code))]
fn is_rate_limit_page(content: &str) -> bool {
    content.contains("429 Too Many Requests")
        || (content.contains("429") && content.contains("Too Many Requests"))
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher;

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(_config: BrowserEngineConfig, _user_agent: Option<&str>) -> Self {
        Self
    }

    pub async fn close(&mut self) {}
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl ResultPageSource for BrowserFetcher {
    async fn fetch_page(&mut self, _url: &str) -> Result<PageResult> {
        Err(Error::Browser(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_rate_limit_page() {
        assert!(is_rate_limit_page(
            "<html><body><h1>429 Too Many Requests</h1></body></html>"
        ));
        assert!(!is_rate_limit_page(
            "<html><body><strong>Ata nº 429/2024</strong></body></html>"
        ));
    }
}
