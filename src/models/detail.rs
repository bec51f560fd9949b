//! Parsed detail pages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which fetch tier produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    #[default]
    Direct,
    Assisted,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Assisted => "assisted",
        }
    }
}

/// Key/value pairs of one specification block.
pub type SpecFields = BTreeMap<String, String>;

/// A parsed GPU detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailRecord {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub hero: SpecFields,
    #[serde(default)]
    pub sections: BTreeMap<String, SpecFields>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub fetched_via: FetchStrategy,
    /// Missing on records written by older versions of the dataset.
    #[serde(default)]
    pub fetched_at: Option<DateTime<Utc>>,
}

impl DetailRecord {
    pub fn section(&self, name: &str) -> Option<&SpecFields> {
        self.sections.get(name)
    }

    /// Stamp provenance after a successful fetch.
    pub fn with_provenance(mut self, via: FetchStrategy, at: DateTime<Utc>) -> Self {
        self.fetched_via = via;
        self.fetched_at = Some(at);
        self
    }
}
