//! Folding crawl results into the persisted dataset.

use std::collections::{BTreeSet, HashMap};

use tracing::{debug, warn};

use super::ledger::FailureLedger;
use super::pool::DetailTarget;
use crate::models::{Dataset, DetailRecord, FailureEntry, FilterRecord, Listing};
use crate::normalize::{normalize, NormalizedKey};

/// Everything one run produced, waiting to be folded into a dataset.
#[derive(Debug, Clone, Default)]
pub struct CrawlBatch {
    pub listings: Vec<Listing>,
    pub filters: Vec<FilterRecord>,
    pub details: Vec<DetailRecord>,
    pub failures: Vec<FailureEntry>,
}

impl CrawlBatch {
    pub fn is_empty(&self) -> bool {
        self.listings.is_empty() && self.filters.is_empty() && self.details.is_empty() && self.failures.is_empty()
    }
}

/// Merge `batch` into `existing`.
///
/// Listings are appended unless an identical row is already present. A
/// detail record replaces any older one for its key and clears the key from
/// the ledger. A failure is only kept while its key has no detail. Keys that
/// no listing points at are dropped.
pub fn merge(mut existing: Dataset, batch: &CrawlBatch) -> Dataset {
    for listing in &batch.listings {
        if !existing.listings.contains(listing) {
            existing.listings.push(listing.clone());
        }
    }

    for filter in &batch.filters {
        match existing.filters.iter_mut().find(|f| f.same_combo(filter)) {
            Some(slot) => *slot = filter.clone(),
            None => existing.filters.push(filter.clone()),
        }
    }

    for record in &batch.details {
        let key = normalize(&record.url);
        match existing.details.get(&key) {
            Some(current) if current.fetched_at > record.fetched_at => {
                debug!("Keeping newer detail for {}", key);
            }
            _ => {
                existing.details.insert(key, record.clone());
            }
        }
    }

    let mut ledger = FailureLedger::from_entries(std::mem::take(&mut existing.failed_details));
    for failure in &batch.failures {
        ledger.upsert(failure.clone());
    }
    ledger.retain(|key, _| !existing.details.contains_key(key));
    existing.failed_details = ledger.into_entries();

    prune_orphans(&mut existing);
    existing.count = existing.listings.len();
    existing
}

/// Drop details and failures whose key no listing references.
pub fn prune_orphans(dataset: &mut Dataset) -> usize {
    let keys = dataset.listing_keys();
    let before = dataset.details.len() + dataset.failed_details.len();
    dataset.details.retain(|key, _| keys.contains(key));
    dataset.failed_details.retain(|f| keys.contains(&f.normalized_key));
    let pruned = before - dataset.details.len() - dataset.failed_details.len();
    if pruned > 0 {
        warn!("Dropped {} detail or failure entries with no matching listing", pruned);
    }
    pruned
}

/// Detail targets for every listed key that has no detail yet, in listing
/// order, one per key. Ledger attempt counts are not carried; only retry
/// mode advances them.
pub fn fill_missing_candidates(dataset: &Dataset) -> Vec<DetailTarget> {
    let mut seen = BTreeSet::new();
    dataset
        .listings
        .iter()
        .filter(|l| !l.detail_url.trim().is_empty())
        .filter_map(|l| {
            let key = l.key();
            if dataset.has_detail(&key) || !seen.insert(key.clone()) {
                return None;
            }
            Some(DetailTarget::new(l.detail_url.clone(), key, 0))
        })
        .collect()
}

/// Detail targets for one key per listing, used after a fresh listing crawl.
pub fn listing_targets(listings: &[Listing]) -> Vec<DetailTarget> {
    let mut seen = BTreeSet::new();
    listings
        .iter()
        .filter(|l| !l.detail_url.trim().is_empty())
        .filter_map(|l| {
            let key = l.key();
            if !seen.insert(key.clone()) {
                return None;
            }
            Some(DetailTarget::new(l.detail_url.clone(), key, 0))
        })
        .collect()
}

/// Detail targets for ledger entries, at most `max` of them.
pub fn retry_candidates(dataset: &Dataset, max: Option<usize>) -> Vec<DetailTarget> {
    FailureLedger::from_entries(dataset.failed_details.clone())
        .pending(max)
        .into_iter()
        .map(|f| DetailTarget::new(f.url.clone(), f.normalized_key.clone(), f.attempt_count))
        .collect()
}

/// What [`patch_listings`] changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchReport {
    pub removed: usize,
    pub added: usize,
    pub listings: usize,
    pub pruned: usize,
}

/// Replace the listings of the given (manufacturer, year) combinations with
/// the patch dataset's rows for them.
///
/// Afterwards listings are deduplicated by detail URL without its trailing
/// slash: the first position is kept and the last row wins. Filter records
/// for the patched combinations are recounted.
pub fn patch_listings(dataset: &mut Dataset, patch: &Dataset, combos: &[(String, i32)]) -> PatchReport {
    let in_scope = |l: &Listing| combos.iter().any(|(m, y)| l.matches_combo(m, *y));

    let before = dataset.listings.len();
    dataset.listings.retain(|l| !in_scope(l));
    let removed = before - dataset.listings.len();

    let incoming: Vec<Listing> = patch.listings.iter().filter(|l| in_scope(l)).cloned().collect();
    let added = incoming.len();

    let mut order: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Listing> = HashMap::new();
    for listing in dataset.listings.drain(..).chain(incoming) {
        let url = listing.detail_url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            continue;
        }
        if !rows.contains_key(&url) {
            order.push(url.clone());
        }
        rows.insert(url, listing);
    }
    dataset.listings = order.into_iter().filter_map(|u| rows.remove(&u)).collect();

    for filter in dataset.filters.iter_mut() {
        if combos.iter().any(|(m, y)| filter.year == *y && filter.manufacturer.eq_ignore_ascii_case(m)) {
            filter.results = dataset
                .listings
                .iter()
                .filter(|l| l.matches_combo(&filter.manufacturer, filter.year))
                .count();
        }
    }

    let pruned = prune_orphans(dataset);
    dataset.count = dataset.listings.len();
    PatchReport {
        removed,
        added,
        listings: dataset.count,
        pruned,
    }
}

/// Keys in `details` and `failed_details` both; empty after any merge.
pub fn overlapping_keys(dataset: &Dataset) -> Vec<NormalizedKey> {
    dataset
        .failed_details
        .iter()
        .filter(|f| dataset.has_detail(&f.normalized_key))
        .map(|f| f.normalized_key.clone())
        .collect()
}
