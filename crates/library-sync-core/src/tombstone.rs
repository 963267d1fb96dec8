//! Tombstone ledger: recorded deletions per collection.
//!
//! A tombstone maps an item key to the time it was deleted. It outlives the
//! item so that a stale copy arriving later (from a peer that never saw the
//! deletion) can be recognized and rejected, and so that an incoming deletion
//! can be checked against the creation time of the local item.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key -> deletion time for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneLedger(HashMap<String, DateTime<Utc>>);

impl TombstoneLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0.get(key).copied()
    }

    /// Record a deletion, keeping the latest time per key.
    ///
    /// Returns true if the ledger changed.
    pub fn record(&mut self, key: &str, at: DateTime<Utc>) -> bool {
        match self.0.get(key) {
            Some(existing) if *existing >= at => false,
            _ => {
                self.0.insert(key.to_string(), at);
                true
            }
        }
    }

    /// Whether an item created at `created` must be rejected because it was
    /// deleted at or after that time.
    pub fn suppresses(&self, key: &str, created: DateTime<Utc>) -> bool {
        !survives_tombstone(created, self.get(key))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Wire form: key -> unix seconds.
    pub fn to_unix_map(&self) -> HashMap<String, i64> {
        self.0
            .iter()
            .map(|(k, v)| (k.clone(), v.timestamp()))
            .collect()
    }
}

impl FromIterator<(String, DateTime<Utc>)> for TombstoneLedger {
    fn from_iter<I: IntoIterator<Item = (String, DateTime<Utc>)>>(iter: I) -> Self {
        let mut ledger = Self::new();
        for (key, at) in iter {
            ledger.record(&key, at);
        }
        ledger
    }
}

/// Whether an item created at `created` outlives the tombstone `deleted`.
/// Re-creation has to be strictly newer than the deletion.
pub fn survives_tombstone(created: DateTime<Utc>, deleted: Option<DateTime<Utc>>) -> bool {
    deleted.is_none_or(|at| created > at)
}

/// Whether an incoming deletion at `removed` applies to a local item created
/// at `created`. Items recreated after the deletion survive it.
pub fn removal_applies(created: DateTime<Utc>, removed: DateTime<Utc>) -> bool {
    created < removed
}

/// Timestamp for a local action at `now` that must order strictly after
/// `floor`. Times have one-second resolution, so an action in the same second
/// as the one it follows is pushed one second later.
pub fn stamp_after(now: DateTime<Utc>, floor: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match floor {
        Some(floor) if now <= floor => floor + TimeDelta::seconds(1),
        _ => now,
    }
}
