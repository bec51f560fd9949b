//! Page navigation, challenge waiting and cookie extraction.

#![cfg(feature = "browser")]

use std::time::Duration;

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::network::{GetCookiesParams, SetUserAgentOverrideParams};
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::types::BrowserCookie;
use super::{ChallengeUnresolved, ConfirmationSignal};
use crate::parse::contains_block_marker;
use crate::scrapers::http_client::USER_AGENT;

/// JavaScript to wait for page ready state.
const WAIT_FOR_READY_SCRIPT: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

const CHALLENGE_POLL: Duration = Duration::from_secs(1);

/// Wait for the page to reach a ready state.
pub(crate) async fn wait_for_page_ready(page: &Page, timeout_secs: u64) {
    let ready_timeout = Duration::from_secs(timeout_secs);
    match tokio::time::timeout(ready_timeout, page.evaluate(WAIT_FOR_READY_SCRIPT.to_string())).await {
        Ok(Ok(result)) => {
            let state: String = result.into_value().unwrap_or_else(|_| "unknown".to_string());
            debug!("Page ready state: {}", state);
        }
        Ok(Err(e)) => {
            debug!("Could not check ready state: {}", e);
        }
        Err(_) => {
            warn!("Timeout waiting for page ready state");
        }
    }
}

pub(crate) async fn set_user_agent(page: &Page) -> Result<()> {
    page.execute(SetUserAgentOverrideParams::new(USER_AGENT.to_string()))
        .await?;
    Ok(())
}

/// Navigate to a URL with timeout handling.
pub(crate) async fn navigate_to_url(page: &Page, url: &str, timeout_secs: u64) -> Result<()> {
    info!("Navigating to {}", url);
    let nav_params = NavigateParams::builder()
        .url(url)
        .build()
        .map_err(|e| anyhow::anyhow!("Invalid URL: {}", e))?;

    tokio::time::timeout(Duration::from_secs(timeout_secs), page.execute(nav_params))
        .await
        .map_err(|_| anyhow::anyhow!("Navigation timed out after {}s for {}", timeout_secs, url))?
        .map_err(|e| anyhow::anyhow!("Navigation failed for {}: {}", url, e))?;

    wait_for_page_ready(page, timeout_secs).await;
    Ok(())
}

/// If the page shows a block marker, wait for it to clear: either until the
/// operator confirms, or by polling for up to `wait_seconds`.
///
/// Returns the final page content, or [`ChallengeUnresolved`] when the
/// marker is still present afterwards.
pub(crate) async fn settle_challenge(
    page: &Page,
    url: &str,
    wait_seconds: u64,
    confirmation: Option<&dyn ConfirmationSignal>,
) -> Result<String> {
    let mut content = page.content().await?;
    if !contains_block_marker(&content) {
        return Ok(content);
    }

    match confirmation {
        Some(signal) => {
            info!("Bot check shown for {}; waiting for manual confirmation", url);
            signal
                .wait_for_confirmation("Solve the check in the browser window, then press Enter")
                .await;
            content = page.content().await?;
        }
        None => {
            info!("Bot check shown for {}; waiting up to {}s for it to clear", url, wait_seconds);
            let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_seconds);
            while contains_block_marker(&content) && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(CHALLENGE_POLL).await;
                content = page.content().await?;
            }
        }
    }

    if contains_block_marker(&content) {
        return Err(ChallengeUnresolved {
            url: url.to_string(),
        }
        .into());
    }
    Ok(content)
}

/// Extract cookies from the browser page.
pub(crate) async fn extract_browser_cookies(page: &Page, url: &str) -> Vec<BrowserCookie> {
    let cookie_params = GetCookiesParams::builder()
        .urls(vec![url.to_string()])
        .build();

    let browser_cookies = match page.execute(cookie_params).await {
        Ok(result) => result.result.cookies,
        Err(e) => {
            warn!("Failed to get cookies via CDP: {}, trying page.get_cookies()", e);
            page.get_cookies().await.unwrap_or_default()
        }
    };

    debug!("Got {} cookies from browser", browser_cookies.len());
    browser_cookies
        .iter()
        .map(|c| BrowserCookie {
            name: c.name.clone(),
            value: c.value.clone(),
            domain: c.domain.clone(),
            path: c.path.clone(),
            secure: c.secure,
            http_only: c.http_only,
        })
        .collect()
}
