//! Browser engine configuration types.

use serde::{Deserialize, Serialize};

use super::types::RefreshOptions;

/// Browser engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode. The site's bot check tends to pass more
    /// reliably with a visible window, so this defaults to false.
    #[serde(default)]
    pub headless: bool,

    /// Navigation timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// How long a rendered fetch waits for a bot check to clear.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: u64,

    /// Wait for an operator to confirm a solved challenge.
    #[serde(default)]
    pub manual_confirm: bool,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

pub fn default_timeout() -> u64 {
    30
}

pub fn default_wait_seconds() -> u64 {
    120
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: false,
            timeout: default_timeout(),
            wait_seconds: default_wait_seconds(),
            manual_confirm: false,
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    pub fn refresh_options(&self) -> RefreshOptions {
        RefreshOptions {
            headless: self.headless,
            wait_seconds: self.wait_seconds,
            manual_confirm: self.manual_confirm,
        }
    }
}
