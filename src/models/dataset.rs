//! The persisted dataset document.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DetailRecord, FailureEntry, FilterRecord, Listing};
use crate::crawl::ledger::FailureLedger;
use crate::normalize::{normalize, NormalizedKey};

/// Aggregate root written to the dataset store.
///
/// After a merge, every key in `details` or `failed_details` belongs to at
/// least one listing, and no key appears in both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub start_year: i32,
    #[serde(default)]
    pub end_year: i32,
    #[serde(default)]
    pub manufacturers: Vec<String>,
    #[serde(default)]
    pub filter_template: String,
    #[serde(default)]
    pub filters: Vec<FilterRecord>,
    #[serde(default)]
    pub count: usize,
    #[serde(default)]
    pub listings: Vec<Listing>,
    #[serde(default)]
    pub details: BTreeMap<NormalizedKey, DetailRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_details: Vec<FailureEntry>,
}

impl Dataset {
    pub fn empty(
        start_year: i32,
        end_year: i32,
        manufacturers: Vec<String>,
        filter_template: impl Into<String>,
    ) -> Self {
        Self {
            generated_at: Utc::now(),
            start_year,
            end_year,
            manufacturers,
            filter_template: filter_template.into(),
            filters: Vec::new(),
            count: 0,
            listings: Vec::new(),
            details: BTreeMap::new(),
            failed_details: Vec::new(),
        }
    }

    pub fn listing_keys(&self) -> BTreeSet<NormalizedKey> {
        self.listings.iter().map(Listing::key).collect()
    }

    pub fn has_detail(&self, key: &NormalizedKey) -> bool {
        self.details.contains_key(key)
    }

    pub fn failure(&self, key: &NormalizedKey) -> Option<&FailureEntry> {
        self.failed_details.iter().find(|f| &f.normalized_key == key)
    }

    /// Bring a freshly loaded document up to date: key details by their
    /// normalized URL and fold legacy or duplicate failure rows together.
    pub fn normalize_keys(&mut self) {
        let raw = std::mem::take(&mut self.details);
        for (stored_key, record) in raw {
            let source = if record.url.trim().is_empty() {
                stored_key.as_str().to_string()
            } else {
                record.url.clone()
            };
            let key = normalize(&source);
            match self.details.get(&key) {
                Some(existing) if existing.fetched_at > record.fetched_at => {}
                _ => {
                    self.details.insert(key, record);
                }
            }
        }

        let mut failures = std::mem::take(&mut self.failed_details);
        for entry in &mut failures {
            entry.rekey();
        }
        self.failed_details = FailureLedger::from_entries(failures).into_entries();
        self.count = self.listings.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_document_keys_are_normalized() {
        let json = r#"{
            "generated_at": "2025-01-01T00:00:00Z",
            "start_year": 2024,
            "end_year": 2025,
            "listings": [
                {"manufacturer": "AMD", "year": 2024, "name": "RX", "detail_url": "https://www.techpowerup.com/gpu-specs/rx.c1/"}
            ],
            "details": {
                "https://www.techpowerup.com/gpu-specs/rx.c1/": {
                    "url": "https://www.techpowerup.com/gpu-specs/rx.c1/",
                    "title": "RX",
                    "hero": {},
                    "sections": {},
                    "images": []
                }
            },
            "failed_details": [
                {"url": "https://www.techpowerup.com/gpu-specs/other.c2?x=1", "error": "boom"},
                {"url": "https://www.techpowerup.com/gpu-specs/other.c2/", "error": "boom again"}
            ]
        }"#;
        let mut dataset: Dataset = serde_json::from_str(json).unwrap();
        dataset.normalize_keys();

        let key = normalize("https://www.techpowerup.com/gpu-specs/rx.c1");
        assert!(dataset.has_detail(&key));
        assert_eq!(dataset.failed_details.len(), 1);
        assert_eq!(
            dataset.failed_details[0].normalized_key.as_str(),
            "https://www.techpowerup.com/gpu-specs/other.c2"
        );
        assert_eq!(dataset.count, 1);
    }
}
