//! Cookie filtering and transfer between the session and the browser.

#[cfg(feature = "browser")]
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
#[cfg(feature = "browser")]
use chromiumoxide::Page;
#[cfg(feature = "browser")]
use tracing::warn;

use super::types::BrowserCookie;

/// Cookies whose domain contains `domain`.
pub fn filter_by_domain(cookies: &[BrowserCookie], domain: &str) -> Vec<BrowserCookie> {
    cookies
        .iter()
        .filter(|c| c.domain.contains(domain))
        .cloned()
        .collect()
}

/// Render cookies as a `Cookie` request header. Later duplicates of a name
/// win, matching how a jar would store them.
pub fn cookie_header(cookies: &[BrowserCookie]) -> Option<String> {
    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for cookie in cookies.iter().filter(|c| !c.name.is_empty()) {
        match pairs.iter_mut().find(|(name, _)| *name == cookie.name) {
            Some(pair) => pair.1 = &cookie.value,
            None => pairs.push((&cookie.name, &cookie.value)),
        }
    }
    if pairs.is_empty() {
        return None;
    }
    Some(
        pairs
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

/// Install session cookies into a page before navigation.
#[cfg(feature = "browser")]
pub(crate) async fn inject_cookies(page: &Page, cookies: &[BrowserCookie]) {
    for cookie in cookies {
        if cookie.name.is_empty() || cookie.domain.is_empty() {
            continue;
        }
        let param = CookieParam::builder()
            .name(cookie.name.clone())
            .value(cookie.value.clone())
            .domain(cookie.domain.clone())
            .path(cookie.path.clone())
            .secure(cookie.secure)
            .http_only(cookie.http_only)
            .build();

        match param {
            Ok(param) => {
                if let Err(e) = page.set_cookie(param).await {
                    warn!("Failed to set cookie {}: {}", cookie.name, e);
                }
            }
            Err(e) => {
                warn!("Failed to build cookie {}: {}", cookie.name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_by_domain_substring() {
        let cookies = vec![
            BrowserCookie::new("cf", "1", ".techpowerup.com"),
            BrowserCookie::new("ads", "2", ".tracker.example"),
        ];
        let kept = filter_by_domain(&cookies, "techpowerup.com");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name, "cf");
    }

    #[test]
    fn header_joins_pairs_and_dedups_names() {
        let cookies = vec![
            BrowserCookie::new("a", "1", "x"),
            BrowserCookie::new("b", "2", "x"),
            BrowserCookie::new("a", "3", "x"),
        ];
        assert_eq!(cookie_header(&cookies).as_deref(), Some("a=3; b=2"));
        assert_eq!(cookie_header(&[]), None);
    }
}
