//! Browser-assisted fetch tier and session bootstrap.
//!
//! Uses chromiumoxide (CDP) when built with the `browser` feature. Without
//! it, [`BrowserFetcher`] still exists but every operation fails, and the
//! fetch path stays on direct HTTP.

mod config;
mod cookies;
mod fetch;
mod types;

pub use config::BrowserEngineConfig;
pub use cookies::{cookie_header, filter_by_domain};
pub use types::{BrowserCookie, RefreshOptions, RenderedPage};

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[cfg(feature = "browser")]
use anyhow::Context;
#[cfg(feature = "browser")]
use chromiumoxide::{Browser, BrowserConfig};
#[cfg(feature = "browser")]
use futures::StreamExt;
#[cfg(feature = "browser")]
use tokio::sync::Mutex;
#[cfg(feature = "browser")]
use tracing::info;

/// A bot check that did not clear within the allowed wait.
#[derive(Debug, Error)]
#[error("bot check still shown at {url}")]
pub struct ChallengeUnresolved {
    pub url: String,
}

/// Blocks until an operator confirms a manual step.
#[async_trait]
pub trait ConfirmationSignal: Send + Sync {
    async fn wait_for_confirmation(&self, prompt: &str);
}

/// Full browser rendering, used as the assisted fetch tier and to obtain
/// fresh session cookies.
#[async_trait]
pub trait BrowserCapability: Send + Sync {
    /// Render `url` with the given session cookies installed.
    async fn fetch_rendered(&self, url: &str, cookies: &[BrowserCookie]) -> Result<RenderedPage>;

    /// Open `target_url` in a fresh browser, get past any bot check and
    /// return the resulting cookies.
    async fn refresh_session(&self, target_url: &str, options: &RefreshOptions) -> Result<Vec<BrowserCookie>>;
}

/// Browser-based fetcher.
#[cfg(feature = "browser")]
pub struct BrowserFetcher {
    pub(crate) config: BrowserEngineConfig,
    pub(crate) browser: Mutex<Option<Arc<Browser>>>,
    confirmation: Option<Arc<dyn ConfirmationSignal>>,
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

    /// Create a new browser fetcher.
    pub fn new(config: BrowserEngineConfig, confirmation: Option<Arc<dyn ConfirmationSignal>>) -> Self {
        Self {
            config,
            browser: Mutex::new(None),
            confirmation,
        }
    }

    /// Find Chrome executable.
    fn find_chrome() -> Result<std::path::PathBuf> {
        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
            if let Ok(output) = std::process::Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path.is_empty() {
                        info!("Found Chrome in PATH: {}", path);
                        return Ok(std::path::PathBuf::from(path));
                    }
                }
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install chromium or google-chrome and retry."
        ))
    }

    /// Launch a browser, or connect to the configured remote one.
    async fn launch(&self, headless: bool) -> Result<Browser> {
        let (browser, mut handler) = match self.config.remote_url.as_deref() {
            Some(url) => {
                info!("Connecting to remote browser at {}", url);
                Browser::connect(url)
                    .await
                    .context("Failed to connect to remote browser")?
            }
            None => {
                info!("Launching browser (headless={})", headless);
                let mut builder = BrowserConfig::builder().chrome_executable(Self::find_chrome()?);
                if !headless {
                    builder = builder.with_head();
                }
                builder = builder
                    .arg("--disable-blink-features=AutomationControlled")
                    .arg("--disable-infobars")
                    .arg("--disable-dev-shm-usage")
                    .arg("--no-first-run")
                    .arg("--no-default-browser-check");
                for arg in &self.config.chrome_args {
                    builder = builder.arg(arg);
                }
                let config = builder
                    .build()
                    .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;
                Browser::launch(config).await.context("Failed to launch browser")?
            }
        };

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        Ok(browser)
    }

    /// Shared browser for rendered fetches, launched on first use.
    async fn shared_browser(&self) -> Result<Arc<Browser>> {
        let mut slot = self.browser.lock().await;
        if let Some(browser) = slot.as_ref() {
            return Ok(browser.clone());
        }
        let browser = Arc::new(self.launch(self.config.headless).await?);
        *slot = Some(browser.clone());
        Ok(browser)
    }

    fn confirmation_for(&self, manual_confirm: bool) -> Option<&dyn ConfirmationSignal> {
        if manual_confirm {
            self.confirmation.as_deref()
        } else {
            None
        }
    }

    /// Close the shared browser.
    pub async fn close(&self) {
        self.browser.lock().await.take();
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl BrowserCapability for BrowserFetcher {
    async fn fetch_rendered(&self, url: &str, session_cookies: &[BrowserCookie]) -> Result<RenderedPage> {
        let browser = self.shared_browser().await?;
        let page = browser.new_page("about:blank").await?;

        let result: Result<RenderedPage> = async {
            fetch::set_user_agent(&page).await?;
            cookies::inject_cookies(&page, session_cookies).await;
            fetch::navigate_to_url(&page, url, self.config.timeout).await?;
            let content = fetch::settle_challenge(
                &page,
                url,
                self.config.wait_seconds,
                self.confirmation_for(self.config.manual_confirm),
            )
            .await?;
            let final_url = page
                .url()
                .await?
                .map(|u| u.to_string())
                .unwrap_or_else(|| url.to_string());
            let cookies = fetch::extract_browser_cookies(&page, &final_url).await;
            Ok(RenderedPage {
                url: url.to_string(),
                final_url,
                content,
                cookies,
            })
        }
        .await;

        let _ = page.close().await;
        result
    }

    async fn refresh_session(&self, target_url: &str, options: &RefreshOptions) -> Result<Vec<BrowserCookie>> {
        let mut browser = self.launch(options.headless).await?;
        let page = browser.new_page("about:blank").await?;

        let result: Result<Vec<BrowserCookie>> = async {
            fetch::set_user_agent(&page).await?;
            fetch::navigate_to_url(&page, target_url, self.config.timeout).await?;
            fetch::settle_challenge(
                &page,
                target_url,
                options.wait_seconds,
                self.confirmation_for(options.manual_confirm),
            )
            .await?;
            Ok(fetch::extract_browser_cookies(&page, target_url).await)
        }
        .await;

        let _ = page.close().await;
        let _ = browser.close().await;
        result
    }
}

// Stub for when browser feature is disabled
#[cfg(not(feature = "browser"))]
pub struct BrowserFetcher {
    #[allow(dead_code)]
    config: BrowserEngineConfig,
}

#[cfg(not(feature = "browser"))]
impl BrowserFetcher {
    pub fn new(config: BrowserEngineConfig, _confirmation: Option<Arc<dyn ConfirmationSignal>>) -> Self {
        Self { config }
    }

    pub async fn close(&self) {}
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl BrowserCapability for BrowserFetcher {
    async fn fetch_rendered(&self, _url: &str, _cookies: &[BrowserCookie]) -> Result<RenderedPage> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }

    async fn refresh_session(&self, _target_url: &str, _options: &RefreshOptions) -> Result<Vec<BrowserCookie>> {
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with: cargo build --features browser"
        ))
    }
}

/// Whether this build can drive a real browser.
pub const fn browser_available() -> bool {
    cfg!(feature = "browser")
}
