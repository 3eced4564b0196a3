//! Configuration management for atacquire using the prefer crate.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::scrapers::browser::BrowserEngineConfig;
use crate::scrapers::urls::{PortalUrls, DEFAULT_API_URL, DEFAULT_PORTAL_URL};

/// Where downloaded files land inside the download root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationMode {
    /// Flat download root.
    Direct,
    /// One numbered subfolder per record.
    #[default]
    Organized,
    /// Both layouts at once.
    Both,
}

impl OrganizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Organized => "organized",
            Self::Both => "both",
        }
    }

    pub fn includes_direct(&self) -> bool {
        matches!(self, Self::Direct | Self::Both)
    }

    pub fn includes_organized(&self) -> bool {
        matches!(self, Self::Organized | Self::Both)
    }
}

impl fmt::Display for OrganizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrganizationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "direct" | "direto" => Ok(Self::Direct),
            "organized" | "organizado" => Ok(Self::Organized),
            "both" | "ambos" => Ok(Self::Both),
            other => Err(format!(
                "unknown organization mode '{other}' (expected direct, organized or both)"
            )),
        }
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Download root. Must be configured before anything is downloaded.
    pub download_dir: Option<PathBuf>,
    /// Layout of downloaded files.
    pub organization: OrganizationMode,
    /// Portal base URL (search and public record pages).
    pub portal_url: String,
    /// File API base URL.
    pub api_url: String,
    /// User agent configuration.
    /// - None: default atacquire user agent
    /// - "impersonate": a real browser user agent
    /// - anything else: used verbatim
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Attempts per file before giving up.
    pub max_retries: u32,
    /// Backoff unit; the wait after attempt `n` is `2^n` times this.
    pub retry_base_delay_ms: u64,
    /// Pause between records of a batch.
    pub record_delay_ms: u64,
    /// Pause between search pages.
    pub page_delay_ms: u64,
    /// Wait before retrying a rate-limited search page.
    pub rate_limit_wait_ms: u64,
    /// Headless browser used by the search crawler.
    pub browser: BrowserEngineConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            download_dir: None,
            organization: OrganizationMode::default(),
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: None,
            request_timeout: 60,
            max_retries: 3,
            retry_base_delay_ms: 1000,
            record_delay_ms: 500,
            page_delay_ms: 500,
            rate_limit_wait_ms: 5000,
            browser: BrowserEngineConfig::default(),
        }
    }
}

impl Settings {
    /// The configured download root, or `ConfigurationMissing`.
    pub fn require_download_dir(&self) -> Result<&Path> {
        self.download_dir.as_deref().ok_or_else(|| {
            Error::ConfigurationMissing(
                "download directory is not configured; set download_dir in the config file, \
                 pass --download-dir or set ATACQUIRE_DOWNLOAD_DIR"
                    .to_string(),
            )
        })
    }

    pub fn urls(&self) -> PortalUrls {
        PortalUrls::new(&self.portal_url, &self.api_url)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download root.
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "target")]
    pub download_dir: Option<String>,
    /// Organization mode (direct, organized, both).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<OrganizationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_wait_ms: Option<u64>,
    /// Browser configuration for the search crawler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<BrowserEngineConfig>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers atacquire config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("atacquire").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring config file {}: {}", path.display(), e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the file extension (TOML, YAML, otherwise JSON).
    pub async fn load_from_path(path: &Path) -> std::result::Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory of the config file, if it was loaded from one.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved against `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref dir) = self.download_dir {
            settings.download_dir = Some(self.resolve_path(dir, base_dir));
        }
        if let Some(mode) = self.organization {
            settings.organization = mode;
        }
        if let Some(ref url) = self.portal_url {
            settings.portal_url = url.clone();
        }
        if let Some(ref url) = self.api_url {
            settings.api_url = url.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(retries) = self.max_retries {
            settings.max_retries = retries.max(1);
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry_base_delay_ms = delay;
        }
        if let Some(delay) = self.record_delay_ms {
            settings.record_delay_ms = delay;
        }
        if let Some(delay) = self.page_delay_ms {
            settings.page_delay_ms = delay;
        }
        if let Some(wait) = self.rate_limit_wait_ms {
            settings.rate_limit_wait_ms = wait;
        }
        if let Some(ref browser) = self.browser {
            settings.browser = browser.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Download root from the command line or environment.
    pub download_dir: Option<PathBuf>,
    /// Organization mode from the command line.
    pub organization: Option<OrganizationMode>,
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("Ignoring config file {}: {}", path.display(), e);
            Config::default()
        }),
        None => Config::load().await,
    };

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let base_dir = config.base_dir().unwrap_or_else(|| cwd.clone());

    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings, &base_dir);
    settings.browser = settings.browser.with_env_overrides();

    // Command-line values win over the file; relative paths follow the CWD.
    if let Some(dir) = options.download_dir {
        settings.download_dir = Some(config.resolve_path(&dir.to_string_lossy(), &cwd));
    }
    if let Some(mode) = options.organization {
        settings.organization = mode;
    }

    tracing::debug!(
        "Settings: download_dir={:?}, organization={}",
        settings.download_dir,
        settings.organization
    );

    (settings, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn organization_mode_parses_aliases() {
        assert_eq!("Direct".parse::<OrganizationMode>(), Ok(OrganizationMode::Direct));
        assert_eq!("organizado".parse::<OrganizationMode>(), Ok(OrganizationMode::Organized));
        assert_eq!("ambos".parse::<OrganizationMode>(), Ok(OrganizationMode::Both));
        assert!("flat".parse::<OrganizationMode>().is_err());
    }

    #[test]
    fn missing_download_dir_is_configuration_error() {
        let err = Settings::default().require_download_dir().unwrap_err();
        assert!(matches!(err, Error::ConfigurationMissing(_)));
    }

    #[tokio::test]
    async fn toml_config_resolves_relative_download_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atacquire.toml");
        std::fs::write(
            &path,
            "download_dir = \"atas\"\norganization = \"both\"\nmax_retries = 5\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings, &config.base_dir().unwrap());

        assert_eq!(settings.download_dir, Some(dir.path().join("atas")));
        assert_eq!(settings.organization, OrganizationMode::Both);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.page_delay_ms, 500);
    }

    #[tokio::test]
    async fn yaml_and_json_configs_are_supported() {
        let dir = TempDir::new().unwrap();
        let yaml = dir.path().join("atacquire.yaml");
        std::fs::write(&yaml, "organization: direct\nrecord_delay_ms: 0\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.organization, Some(OrganizationMode::Direct));
        assert_eq!(config.record_delay_ms, Some(0));

        let json = dir.path().join("atacquire.json");
        std::fs::write(&json, r#"{"target": "/srv/atas"}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        assert_eq!(config.download_dir.as_deref(), Some("/srv/atas"));
    }

    #[tokio::test]
    async fn invalid_config_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atacquire.toml");
        std::fs::write(&path, "download_dir = [").unwrap();
        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(err.contains("TOML"));
    }

    #[tokio::test]
    async fn command_line_overrides_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("atacquire.toml");
        std::fs::write(&path, "download_dir = \"/from/file\"\n").unwrap();

        let (settings, _) = load_settings_with_options(LoadOptions {
            config_path: Some(path),
            download_dir: Some(dir.path().join("cli")),
            organization: Some(OrganizationMode::Direct),
        })
        .await;

        assert_eq!(settings.download_dir, Some(dir.path().join("cli")));
        assert_eq!(settings.organization, OrganizationMode::Direct);
    }
}
