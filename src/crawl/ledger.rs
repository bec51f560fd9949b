//! Failure ledger: one entry per normalized detail key.

use std::collections::BTreeMap;

use crate::models::FailureEntry;
use crate::normalize::NormalizedKey;

/// Deduplicated set of failed detail fetches.
///
/// Folding two entries for the same key keeps the highest attempt count and
/// the error context of the most recent attempt, so the result does not
/// depend on the order entries arrive in.
#[derive(Debug, Clone, Default)]
pub struct FailureLedger {
    entries: BTreeMap<NormalizedKey, FailureEntry>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = FailureEntry>) -> Self {
        let mut ledger = Self::new();
        for entry in entries {
            ledger.upsert(entry);
        }
        ledger
    }

    /// Record a failure, folding it into any existing entry for its key.
    pub fn upsert(&mut self, mut entry: FailureEntry) {
        if entry.normalized_key.is_empty() {
            entry.rekey();
        }
        let key = entry.normalized_key.clone();
        match self.entries.remove(&key) {
            None => {
                self.entries.insert(key, entry);
            }
            Some(existing) => {
                self.entries.insert(key, fold(existing, entry));
            }
        }
    }

    pub fn remove(&mut self, key: &NormalizedKey) -> Option<FailureEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &NormalizedKey) -> Option<&FailureEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &NormalizedKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&NormalizedKey, &FailureEntry) -> bool) {
        self.entries.retain(|k, v| keep(k, v));
    }

    /// Entries due for another attempt, in key order, at most `max` of them.
    pub fn pending(&self, max: Option<usize>) -> Vec<FailureEntry> {
        let limit = max.unwrap_or(usize::MAX);
        self.entries.values().take(limit).cloned().collect()
    }

    pub fn into_entries(self) -> Vec<FailureEntry> {
        self.entries.into_values().collect()
    }
}

/// Combine two entries for one key. The entry with the later attempt wins
/// the error context; ties fall back to comparing the context itself.
fn fold(a: FailureEntry, b: FailureEntry) -> FailureEntry {
    let attempts = a.attempt_count.max(b.attempt_count);
    let rank = |e: &FailureEntry| (e.last_attempt_time, e.error_detail.clone(), e.url.clone());
    let mut winner = if rank(&b) >= rank(&a) { b } else { a };
    winner.attempt_count = attempts;
    winner
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FailureKind;
    use chrono::{TimeZone, Utc};

    fn entry(url: &str, detail: &str, attempts: u32, hour: u32) -> FailureEntry {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, hour, 0, 0).unwrap();
        FailureEntry::new(url, FailureKind::Transient, detail, attempts, at)
    }

    #[test]
    fn duplicate_keys_fold_into_one_entry() {
        let ledger = FailureLedger::from_entries(vec![
            entry("https://a.test/gpu/x.c1/", "old", 3, 1),
            entry("https://A.test/gpu/x.c1?ajax=", "new", 1, 5),
        ]);
        assert_eq!(ledger.len(), 1);
        let e = ledger.pending(None).remove(0);
        assert_eq!(e.attempt_count, 3);
        assert_eq!(e.error_detail, "new");
    }

    #[test]
    fn fold_order_does_not_matter() {
        let a = entry("https://a.test/x", "first", 2, 1);
        let b = entry("https://a.test/x/", "second", 4, 2);
        let one = FailureLedger::from_entries(vec![a.clone(), b.clone()]).into_entries();
        let two = FailureLedger::from_entries(vec![b, a]).into_entries();
        assert_eq!(one, two);
    }

    #[test]
    fn legacy_rows_without_key_are_rekeyed() {
        let mut legacy = entry("https://a.test/x/", "boom", 1, 1);
        legacy.normalized_key = NormalizedKey::default();
        let ledger = FailureLedger::from_entries(vec![legacy]);
        assert!(ledger.contains(&crate::normalize::normalize("https://a.test/x")));
    }

    #[test]
    fn pending_respects_cap() {
        let ledger = FailureLedger::from_entries(vec![
            entry("https://a.test/1", "e", 1, 1),
            entry("https://a.test/2", "e", 1, 1),
            entry("https://a.test/3", "e", 1, 1),
        ]);
        assert_eq!(ledger.pending(Some(2)).len(), 2);
        assert_eq!(ledger.pending(Some(0)).len(), 0);
        assert_eq!(ledger.pending(None).len(), 3);
    }

    #[test]
    fn remove_drops_entry() {
        let mut ledger = FailureLedger::from_entries(vec![entry("https://a.test/1", "e", 1, 1)]);
        let key = crate::normalize::normalize("https://a.test/1");
        assert!(ledger.remove(&key).is_some());
        assert!(ledger.is_empty());
    }
}
