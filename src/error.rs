//! Error types shared across the crate.
//!
//! Only run-level setup failures surface as errors to the caller. Per-item
//! fetch failures are contained in the pool and become ledger entries.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or inconsistent configuration, detected before any fetching.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid year range: {start}..={end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("concurrency must be at least 1")]
    ZeroConcurrency,
    #[error("retries must be at least 1")]
    ZeroRetries,
    #[error("no manufacturers configured")]
    NoManufacturers,
    #[error("invalid base URL '{0}': {1}")]
    InvalidBaseUrl(String, url::ParseError),
    #[error("filter template '{0}' must contain {{year}} and {{manufacturer}}")]
    InvalidFilterTemplate(String),
    #[error("failed to read config file {path}: {reason}")]
    File { path: PathBuf, reason: String },
}

/// Dataset or session store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("dataset not found: {0}")]
    NotFound(PathBuf),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        StoreError::Json {
            path: path.into(),
            source,
        }
    }
}

/// Network-level failure from the HTTP capability (no response received).
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError(format!("timeout: {}", e))
        } else {
            TransportError(e.to_string())
        }
    }
}

/// Fatal run errors. Nothing is persisted when one of these is returned
/// before fetching starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("session bootstrap failed: {0}")]
    Session(String),
    #[error("bot check not cleared during session bootstrap: {0}")]
    Challenge(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}
