//! Listing rows and per-query filter records.

use serde::{Deserialize, Serialize};

use crate::normalize::{normalize, NormalizedKey};

/// One row of a listing query result.
///
/// Several listings may point at the same detail page (variants and
/// re-listings); they are kept as separate rows and share a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub manufacturer: String,
    pub year: i32,
    pub name: String,
    pub detail_url: String,
}

impl Listing {
    pub fn new(
        manufacturer: impl Into<String>,
        year: i32,
        name: impl Into<String>,
        detail_url: impl Into<String>,
    ) -> Self {
        Self {
            manufacturer: manufacturer.into(),
            year,
            name: name.into(),
            detail_url: detail_url.into(),
        }
    }

    pub fn key(&self) -> NormalizedKey {
        normalize(&self.detail_url)
    }

    /// Whether this row belongs to the given (manufacturer, year) query.
    pub fn matches_combo(&self, manufacturer: &str, year: i32) -> bool {
        self.year == year && self.manufacturer.eq_ignore_ascii_case(manufacturer)
    }
}

/// Outcome of one (manufacturer, year) listing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRecord {
    pub manufacturer: String,
    pub year: i32,
    #[serde(default)]
    pub query: String,
    pub results: usize,
    #[serde(default)]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FilterRecord {
    pub fn same_combo(&self, other: &FilterRecord) -> bool {
        self.year == other.year && self.manufacturer.eq_ignore_ascii_case(&other.manufacturer)
    }
}
