//! Browser fetch types.

use serde::{Deserialize, Serialize};

/// A page as rendered by the browser.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub content: String,
    /// Cookies from the browser session after the page settled.
    pub cookies: Vec<BrowserCookie>,
}

/// Cookie in browser storage-state form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            secure: false,
            http_only: false,
        }
    }
}

/// How a session refresh drives the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshOptions {
    pub headless: bool,
    /// How long to wait for a bot check to clear on its own.
    pub wait_seconds: u64,
    /// Wait for the operator to confirm instead of polling.
    pub manual_confirm: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            headless: false,
            wait_seconds: 120,
            manual_confirm: false,
        }
    }
}
