//! Detail URL canonicalization.
//!
//! [`normalize`] is the only identity mechanism for detail pages: listings,
//! detail records and ledger entries are all matched by the key it returns.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

/// Stable dedup key derived from a raw detail URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a raw detail URL into its dedup key.
///
/// Lowercases scheme and host, drops userinfo, default port, query and
/// fragment, and strips trailing slashes from the path. Never fails: input
/// that does not parse as an absolute URL is trimmed textually instead.
pub fn normalize(raw: &str) -> NormalizedKey {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(url) if url.has_host() => NormalizedKey(canonical_form(&url)),
        _ => NormalizedKey(textual_form(trimmed)),
    }
}

fn canonical_form(url: &Url) -> String {
    let mut out = String::with_capacity(url.as_str().len());
    out.push_str(url.scheme());
    out.push_str("://");
    if let Some(host) = url.host_str() {
        out.push_str(&host.to_ascii_lowercase());
    }
    // `port()` is None for the scheme's default port
    if let Some(port) = url.port() {
        out.push(':');
        out.push_str(&port.to_string());
    }
    out.push_str(url.path().trim_end_matches('/'));
    out
}

fn textual_form(raw: &str) -> String {
    let cut = raw.find(['?', '#']).map(|i| &raw[..i]).unwrap_or(raw);
    cut.trim_end_matches('/').to_string()
}

/// Merge query parameters into a URL, replacing existing values for the
/// same names and keeping blank values (`ajax=`).
pub fn merge_url_query(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !params.iter().any(|(name, _)| name == k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

/// The page a human would open for a listing query: the same URL without
/// the `ajax` flag. Used as the target for session refreshes.
pub fn to_human_listing_url(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    if !parsed.query_pairs().any(|(k, _)| k == "ajax") {
        return url.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != "ajax")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        parsed.set_query(None);
    } else {
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_query_fragment_and_trailing_slash() {
        assert_eq!(
            normalize("https://www.techpowerup.com/gpu-specs/geforce-rtx-4090.c3889/?x=1#top").as_str(),
            "https://www.techpowerup.com/gpu-specs/geforce-rtx-4090.c3889"
        );
    }

    #[test]
    fn lowercases_scheme_and_host_only() {
        assert_eq!(
            normalize("  HTTPS://WWW.TechPowerUp.com/gpu-specs/Radeon.c1 ").as_str(),
            "https://www.techpowerup.com/gpu-specs/Radeon.c1"
        );
    }

    #[test]
    fn drops_default_port_and_userinfo() {
        assert_eq!(
            normalize("https://user:pw@example.com:443/a/").as_str(),
            "https://example.com/a"
        );
        assert_eq!(
            normalize("http://example.com:8080/a").as_str(),
            "http://example.com:8080/a"
        );
    }

    #[test]
    fn variants_share_a_key() {
        let a = normalize("https://www.techpowerup.com/gpu-specs/arc-a770.c3914");
        let b = normalize("https://www.techpowerup.com/gpu-specs/arc-a770.c3914/");
        let c = normalize("https://WWW.techpowerup.com/gpu-specs/arc-a770.c3914?utm=feed");
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn normalization_is_idempotent() {
        let inputs = [
            "https://www.techpowerup.com/gpu-specs/",
            "https://www.techpowerup.com/gpu-specs/geforce-gtx-690.c342/#memory",
            "http://Example.COM:80/x/y//?a=b",
            "https://example.com",
            "/gpu-specs/relative.c1/?q",
            "not a url at all/",
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(once.as_str());
            assert_eq!(once, twice, "not idempotent for {input}");
        }
    }

    #[test]
    fn malformed_input_still_normalizes() {
        assert_eq!(normalize("").as_str(), "");
        assert_eq!(normalize("gpu-specs/x.c1/?a#b").as_str(), "gpu-specs/x.c1");
    }

    #[test]
    fn merge_url_query_replaces_and_keeps_blank_values() {
        let merged = merge_url_query(
            "https://www.techpowerup.com/gpu-specs/?f=old&sort=name",
            &[("f", "year_2024~mfgr_AMD"), ("ajax", "")],
        );
        let parsed = Url::parse(&merged).unwrap();
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("sort".to_string(), "name".to_string()),
                ("f".to_string(), "year_2024~mfgr_AMD".to_string()),
                ("ajax".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn human_listing_url_drops_ajax() {
        let url = "https://www.techpowerup.com/gpu-specs/?f=year_2024&ajax=";
        let human = to_human_listing_url(url);
        assert!(!human.contains("ajax"));
        assert!(human.contains("f=year_2024"));
        assert_eq!(
            to_human_listing_url("https://www.techpowerup.com/gpu-specs/?ajax="),
            "https://www.techpowerup.com/gpu-specs/"
        );
    }
}
