//! Failure ledger entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::normalize::{normalize, NormalizedKey};

/// Classification of a terminal fetch failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    RateLimited,
    Challenge,
    Transient,
    #[default]
    Terminal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Challenge => "challenge",
            Self::Transient => "transient",
            Self::Terminal => "terminal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn first_attempt() -> u32 {
    1
}

/// A detail URL whose fetch ended in failure.
///
/// Older datasets stored only `{url, error}`; those rows load with a single
/// attempt, a terminal kind and a key recomputed from `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureEntry {
    pub url: String,
    #[serde(default)]
    pub normalized_key: NormalizedKey,
    #[serde(default)]
    pub error_kind: FailureKind,
    #[serde(default, alias = "error")]
    pub error_detail: String,
    #[serde(default = "first_attempt")]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt_time: Option<DateTime<Utc>>,
}

impl FailureEntry {
    pub fn new(
        url: impl Into<String>,
        kind: FailureKind,
        detail: impl Into<String>,
        attempt_count: u32,
        at: DateTime<Utc>,
    ) -> Self {
        let url = url.into();
        Self {
            normalized_key: normalize(&url),
            url,
            error_kind: kind,
            error_detail: detail.into(),
            attempt_count: attempt_count.max(1),
            last_attempt_time: Some(at),
        }
    }

    /// Recompute the key from `url` when it is missing or stale.
    pub fn rekey(&mut self) {
        self.normalized_key = normalize(&self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_row_loads_with_defaults() {
        let entry: FailureEntry = serde_json::from_str(
            r#"{"url": "https://www.techpowerup.com/gpu-specs/x.c1/", "error": "HTTP 500"}"#,
        )
        .unwrap();
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.error_kind, FailureKind::Terminal);
        assert_eq!(entry.error_detail, "HTTP 500");
        assert!(entry.normalized_key.is_empty());
        assert!(entry.last_attempt_time.is_none());
    }

    #[test]
    fn new_entry_never_has_zero_attempts() {
        let entry = FailureEntry::new("https://a/x", FailureKind::Transient, "timeout", 0, Utc::now());
        assert_eq!(entry.attempt_count, 1);
        assert_eq!(entry.normalized_key.as_str(), "https://a/x");
    }
}
