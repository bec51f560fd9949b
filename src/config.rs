//! Configuration management for gpu-ladder using the prefer crate.
//!
//! A config file supplies defaults, command-line flags override them, and
//! the result is a validated [`Settings`] value fixed for the whole run.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::scrapers::browser::BrowserEngineConfig;
use crate::scrapers::{RateLimitConfig, SessionConfig, StrategyPolicy};

pub const DEFAULT_BASE_URL: &str = "https://www.techpowerup.com";
pub const DEFAULT_FILTER_TEMPLATE: &str = "year_{year}~mfgr_{manufacturer}";
pub const DEFAULT_MANUFACTURERS: [&str; 4] = ["NVIDIA", "AMD", "Intel", "Moore Threads"];
pub const DEFAULT_OUTPUT: &str = "gpu_specs.json";
pub const DEFAULT_STORAGE_STATE: &str = ".playwright-state.json";
pub const DEFAULT_COOKIE_DOMAIN: &str = "techpowerup.com";

/// Map user-supplied manufacturer names onto the canonical spelling.
///
/// Matching is case-insensitive; unknown names pass through trimmed. An empty
/// or blank list resolves to the default set.
pub fn resolve_manufacturers(values: &[String]) -> Vec<String> {
    let resolved: Vec<String> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            DEFAULT_MANUFACTURERS
                .iter()
                .find(|m| m.eq_ignore_ascii_case(v))
                .map(|m| m.to_string())
                .unwrap_or_else(|| v.to_string())
        })
        .collect();
    if resolved.is_empty() {
        DEFAULT_MANUFACTURERS.iter().map(|m| m.to_string()).collect()
    } else {
        resolved
    }
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Dataset file.
    pub output: PathBuf,
    /// Indent the dataset JSON.
    pub pretty: bool,
    /// Browser storage-state file holding session cookies.
    pub storage_state: PathBuf,
    pub cookie_domain: String,
    pub base_url: Url,
    pub filter_template: String,
    pub manufacturers: Vec<String>,
    pub start_year: i32,
    pub end_year: i32,
    /// Cap on listings (scrape) or detail fetches (fill-missing).
    pub max_items: Option<usize>,
    /// Cap on ledger entries retried.
    pub max_retry: Option<usize>,
    pub skip_details: bool,
    pub concurrency: usize,
    pub listing_delay: Duration,
    pub detail_delay: Duration,
    pub http_timeout: Duration,
    pub retries: u32,
    pub max_rate_limit_retries: u32,
    pub rate_limit_sleep: Duration,
    pub max_cooldown: Duration,
    pub refresh_cooldown: Duration,
    pub auto_refresh_on_429: bool,
    pub browser_fallback: bool,
    pub prefer_browser_for_listings: bool,
    pub prefer_browser_for_details: bool,
    pub headless: bool,
    pub wait_seconds: u64,
    pub manual_confirm: bool,
    /// Bootstrap a fresh session even if cookies are stored.
    pub refresh_cookies: bool,
    /// Fixed user agent, "random", or None for the default.
    pub user_agent: Option<String>,
    pub chrome_args: Vec<String>,
    pub remote_url: Option<String>,
    pub log_detail_progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let current_year = chrono::Utc::now().year();
        Self {
            output: PathBuf::from(DEFAULT_OUTPUT),
            pretty: false,
            storage_state: PathBuf::from(DEFAULT_STORAGE_STATE),
            cookie_domain: DEFAULT_COOKIE_DOMAIN.to_string(),
            base_url: default_base_url(),
            filter_template: DEFAULT_FILTER_TEMPLATE.to_string(),
            manufacturers: resolve_manufacturers(&[]),
            start_year: current_year - 1,
            end_year: current_year,
            max_items: None,
            max_retry: None,
            skip_details: false,
            concurrency: 2,
            listing_delay: Duration::from_secs(1),
            detail_delay: Duration::from_secs(1),
            http_timeout: Duration::from_secs(30),
            retries: 4,
            max_rate_limit_retries: 6,
            rate_limit_sleep: Duration::from_secs(12),
            max_cooldown: Duration::from_secs(300),
            refresh_cooldown: Duration::from_secs(20),
            auto_refresh_on_429: false,
            browser_fallback: false,
            prefer_browser_for_listings: false,
            prefer_browser_for_details: false,
            headless: false,
            wait_seconds: 120,
            manual_confirm: false,
            refresh_cookies: false,
            user_agent: None,
            chrome_args: Vec::new(),
            remote_url: None,
            log_detail_progress: false,
        }
    }
}

static DEFAULT_URL: LazyLock<Url> = LazyLock::new(|| Url::parse(DEFAULT_BASE_URL).unwrap());

fn default_base_url() -> Url {
    DEFAULT_URL.clone()
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidBaseUrl(raw.to_string(), e))
}

impl Settings {
    /// Check the settings before any fetching starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_year > self.end_year {
            return Err(ConfigError::InvalidYearRange {
                start: self.start_year,
                end: self.end_year,
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        if self.manufacturers.is_empty() {
            return Err(ConfigError::NoManufacturers);
        }
        if !self.filter_template.contains("{year}") || !self.filter_template.contains("{manufacturer}") {
            return Err(ConfigError::InvalidFilterTemplate(self.filter_template.clone()));
        }
        Ok(())
    }

    pub fn set_base_url(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.base_url = parse_base_url(raw)?;
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            listing_delay: self.listing_delay,
            detail_delay: self.detail_delay,
            rate_limit_sleep: self.rate_limit_sleep,
            max_cooldown: self.max_cooldown,
        }
    }

    pub fn browser_config(&self) -> BrowserEngineConfig {
        BrowserEngineConfig {
            headless: self.headless,
            timeout: self.http_timeout.as_secs().max(1),
            wait_seconds: self.wait_seconds,
            manual_confirm: self.manual_confirm,
            chrome_args: self.chrome_args.clone(),
            remote_url: self.remote_url.clone(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let bootstrap_url = self
            .base_url
            .join("gpu-specs/")
            .map(|u| u.to_string())
            .unwrap_or_else(|_| self.base_url.to_string());
        SessionConfig {
            cookie_domain: self.cookie_domain.clone(),
            bootstrap_url,
            refresh_cooldown: self.refresh_cooldown,
            auto_refresh: self.auto_refresh_on_429,
            refresh_on_start: self.refresh_cookies,
            options: self.browser_config().refresh_options(),
        }
    }

    /// Decision policy given whether a browser capability exists.
    pub fn strategy_policy(&self, browser_available: bool) -> StrategyPolicy {
        StrategyPolicy {
            retries: self.retries,
            max_rate_limit_retries: self.max_rate_limit_retries,
            prefer_assisted_listings: self.prefer_browser_for_listings,
            prefer_assisted_details: self.prefer_browser_for_details,
            assisted_fallback: self.browser_fallback,
            assisted_available: browser_available,
            refresh_available: browser_available && self.auto_refresh_on_429,
        }
    }
}

/// Configuration file structure.
///
/// Every field is optional; anything unset keeps the [`Settings`] default.
/// Durations are given in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_template: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub manufacturers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_delay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_timeout: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rate_limit_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_sleep: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cooldown: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_cooldown: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_refresh_on_429: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser_fallback_on_fail: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_browser_for_listings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_browser_for_details: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_confirm: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chrome_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// Seconds as a `Duration`; negative, NaN and infinite values become zero.
pub fn seconds(value: f64) -> Duration {
    Duration::from_secs_f64(if value.is_finite() { value.max(0.0) } else { 0.0 })
}

impl Config {
    /// Load configuration using prefer for discovery of `gpu-ladder.*`
    /// files in the standard locations.
    pub async fn load() -> Self {
        match prefer::load("gpu-ladder").await {
            Ok(pref_config) => match pref_config.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// JSON, TOML and YAML are chosen by file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::File {
            path: path.to_path_buf(),
            reason,
        };
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| file_error(e.to_string()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents).map_err(|e| file_error(format!("invalid TOML: {}", e)))?,
            "yaml" | "yml" => {
                serde_yaml::from_str(&contents).map_err(|e| file_error(format!("invalid YAML: {}", e)))?
            }
            _ => serde_json::from_str(&contents).map_err(|e| file_error(format!("invalid JSON: {}", e)))?,
        };
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths in the file are resolved against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
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
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) -> Result<(), ConfigError> {
        if let Some(ref output) = self.output {
            settings.output = self.resolve_path(output, base_dir);
        }
        if let Some(ref state) = self.storage_state {
            settings.storage_state = self.resolve_path(state, base_dir);
        }
        if let Some(ref base_url) = self.base_url {
            settings.set_base_url(base_url)?;
        }
        if let Some(ref template) = self.filter_template {
            settings.filter_template = template.clone();
        }
        if !self.manufacturers.is_empty() {
            settings.manufacturers = resolve_manufacturers(&self.manufacturers);
        }
        if let Some(ref domain) = self.cookie_domain {
            settings.cookie_domain = domain.clone();
        }
        if let Some(ref ua) = self.user_agent {
            settings.user_agent = Some(ua.clone());
        }
        if let Some(ref remote) = self.remote_url {
            settings.remote_url = Some(remote.clone());
        }
        if !self.chrome_args.is_empty() {
            settings.chrome_args = self.chrome_args.clone();
        }

        settings.pretty = self.pretty.unwrap_or(settings.pretty);
        settings.start_year = self.start_year.unwrap_or(settings.start_year);
        settings.end_year = self.end_year.unwrap_or(settings.end_year);
        settings.concurrency = self.concurrency.unwrap_or(settings.concurrency);
        settings.retries = self.retries.unwrap_or(settings.retries);
        settings.max_rate_limit_retries = self.max_rate_limit_retries.unwrap_or(settings.max_rate_limit_retries);
        settings.auto_refresh_on_429 = self.auto_refresh_on_429.unwrap_or(settings.auto_refresh_on_429);
        settings.browser_fallback = self.browser_fallback_on_fail.unwrap_or(settings.browser_fallback);
        settings.prefer_browser_for_listings =
            self.prefer_browser_for_listings.unwrap_or(settings.prefer_browser_for_listings);
        settings.prefer_browser_for_details =
            self.prefer_browser_for_details.unwrap_or(settings.prefer_browser_for_details);
        settings.headless = self.headless.unwrap_or(settings.headless);
        settings.wait_seconds = self.wait_seconds.unwrap_or(settings.wait_seconds);
        settings.manual_confirm = self.manual_confirm.unwrap_or(settings.manual_confirm);

        if let Some(v) = self.delay {
            settings.listing_delay = seconds(v);
        }
        if let Some(v) = self.detail_delay {
            settings.detail_delay = seconds(v);
        }
        if let Some(v) = self.http_timeout {
            settings.http_timeout = seconds(v);
        }
        if let Some(v) = self.rate_limit_sleep {
            settings.rate_limit_sleep = seconds(v);
        }
        if let Some(v) = self.max_cooldown {
            settings.max_cooldown = seconds(v);
        }
        if let Some(v) = self.refresh_cooldown {
            settings.refresh_cooldown = seconds(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.end_year - settings.start_year, 1);
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.rate_limit_sleep, Duration::from_secs(12));
        assert_eq!(settings.manufacturers, vec!["NVIDIA", "AMD", "Intel", "Moore Threads"]);
    }

    #[test]
    fn seconds_clamp_out_of_range_values() {
        assert_eq!(seconds(f64::INFINITY), Duration::ZERO);
        assert_eq!(seconds(f64::NAN), Duration::ZERO);
        assert_eq!(seconds(-3.0), Duration::ZERO);
        assert_eq!(seconds(2.5), Duration::from_millis(2500));
    }

    #[test]
    fn manufacturers_resolve_case_insensitively() {
        let resolved = resolve_manufacturers(&["amd".into(), " moore threads ".into(), "Matrox".into(), "".into()]);
        assert_eq!(resolved, vec!["AMD", "Moore Threads", "Matrox"]);
        assert_eq!(resolve_manufacturers(&["  ".into()]).len(), 4);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut s = Settings {
            start_year: 2025,
            end_year: 2024,
            ..Default::default()
        };
        assert!(matches!(s.validate(), Err(ConfigError::InvalidYearRange { .. })));
        s.end_year = 2025;
        s.concurrency = 0;
        assert!(matches!(s.validate(), Err(ConfigError::ZeroConcurrency)));
        s.concurrency = 1;
        s.filter_template = "year_{year}".into();
        assert!(matches!(s.validate(), Err(ConfigError::InvalidFilterTemplate(_))));
        assert!(matches!(s.set_base_url("not a url"), Err(ConfigError::InvalidBaseUrl(..))));
    }

    #[test]
    fn policy_needs_browser_for_refresh() {
        let s = Settings {
            auto_refresh_on_429: true,
            ..Default::default()
        };
        assert!(!s.strategy_policy(false).refresh_available);
        assert!(s.strategy_policy(true).refresh_available);
        assert_eq!(s.session_config().bootstrap_url, "https://www.techpowerup.com/gpu-specs/");
    }

    #[tokio::test]
    async fn config_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gpu-ladder.toml");
        std::fs::write(
            &path,
            "output = \"data/gpus.json\"\nconcurrency = 4\nrate_limit_sleep = 5.0\nmanufacturers = [\"nvidia\"]\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        let mut settings = Settings::default();
        config
            .apply_to_settings(&mut settings, &config.base_dir().unwrap())
            .unwrap();
        assert_eq!(settings.output, dir.path().join("data/gpus.json"));
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.rate_limit_sleep, Duration::from_secs(5));
        assert_eq!(settings.manufacturers, vec!["NVIDIA"]);
    }

    #[tokio::test]
    async fn unreadable_config_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(
            Config::load_from_path(&path).await,
            Err(ConfigError::File { .. })
        ));
    }
}
