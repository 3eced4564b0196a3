//! Browser engine configuration types.

use serde::{Deserialize, Serialize};

/// Browser engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// Set to false to watch the crawl in a visible window.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// CDP request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds to wait for result markers after navigation.
    #[serde(default = "default_marker_wait")]
    pub marker_wait_secs: u64,

    /// Extra settle time after markers appear, in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

pub fn default_headless() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

pub fn default_marker_wait() -> u64 {
    10
}

pub fn default_settle_ms() -> u64 {
    1500
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            proxy: None,
            timeout: default_timeout(),
            marker_wait_secs: default_marker_wait(),
            settle_ms: default_settle_ms(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply environment overrides (`BROWSER_URL`, `BROWSER_HEADLESS`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(url) = std::env::var("BROWSER_URL").ok().filter(|s| !s.is_empty()) {
            self.remote_url = Some(url);
        }
        if let Ok(val) = std::env::var("BROWSER_HEADLESS") {
            self.headless = !(val.eq_ignore_ascii_case("false") || val == "0");
        }
        self
    }
}
