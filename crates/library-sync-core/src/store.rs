//! Store abstractions for the synchronized collections.
//!
//! The merge logic never touches disk. It talks to a store through these
//! traits:
//! - [`CollectionStore`] for keyed collections with tombstones
//!   (subscriptions, subscription groups, playlists, history)
//! - [`WatchLaterStore`] for the watch-later queue, which is loaded and saved
//!   as one versioned value
//!
//! Implementations:
//! - `InMemoryCollection` / `InMemoryWatchLater` - for tests and embedders
//! - `JsonCollection` / `JsonWatchLater` (in library-sync-daemon) - JSON files
//!
//! A store must apply one `commit` atomically. Handlers stage every change of
//! one inbound packet in a [`Batch`] and commit once, so a failing store
//! leaves the collection exactly as it was before the packet.

use crate::models::{Keyed, WatchLater};
use crate::tombstone::TombstoneLedger;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One staged mutation of a keyed collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    /// Create or replace the item under its key.
    Upsert(T),
    /// Remove the item with this key, if present.
    Delete(String),
    /// Record a deletion time. Stores keep the latest time per key.
    Tombstone(String, DateTime<Utc>),
}

/// A keyed collection plus its tombstone ledger.
#[async_trait]
pub trait CollectionStore<T>: Send + Sync
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    /// Look up an item by key.
    async fn get(&self, key: &str) -> Result<Option<T>>;

    /// Enumerate every live item.
    async fn list(&self) -> Result<Vec<T>>;

    /// Enumerate every tombstone.
    async fn tombstones(&self) -> Result<TombstoneLedger>;

    /// Apply all changes in order, atomically.
    async fn commit(&self, changes: Vec<Change<T>>) -> Result<()>;

    async fn upsert(&self, item: T) -> Result<()> {
        self.commit(vec![Change::Upsert(item)]).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.commit(vec![Change::Delete(key.to_string())]).await
    }

    async fn tombstone(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.tombstones().await?.get(key))
    }

    async fn set_tombstone(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.commit(vec![Change::Tombstone(key.to_string(), at)]).await
    }
}

/// The watch-later queue as a single stored value.
#[async_trait]
pub trait WatchLaterStore: Send + Sync {
    async fn load(&self) -> Result<WatchLater>;

    /// Replace the stored value atomically.
    async fn save(&self, state: &WatchLater) -> Result<()>;
}

/// Read-through working set for one inbound packet.
///
/// Reads see the effect of changes already staged in the batch. Nothing
/// reaches the store until [`Batch::commit`].
pub struct Batch<'s, T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    store: &'s dyn CollectionStore<T>,
    items: HashMap<String, Option<T>>,
    ledger: Option<TombstoneLedger>,
    changes: Vec<Change<T>>,
}

impl<'s, T> Batch<'s, T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    pub fn new(store: &'s dyn CollectionStore<T>) -> Self {
        Self {
            store,
            items: HashMap::new(),
            ledger: None,
            changes: Vec::new(),
        }
    }

    pub async fn get(&mut self, key: &str) -> Result<Option<T>> {
        if let Some(staged) = self.items.get(key) {
            return Ok(staged.clone());
        }
        let item = self.store.get(key).await?;
        self.items.insert(key.to_string(), item.clone());
        Ok(item)
    }

    async fn ledger(&mut self) -> Result<&mut TombstoneLedger> {
        if self.ledger.is_none() {
            self.ledger = Some(self.store.tombstones().await?);
        }
        Ok(self.ledger.get_or_insert_with(TombstoneLedger::new))
    }

    pub async fn tombstone(&mut self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.ledger().await?.get(key))
    }

    /// Stage a tombstone. Returns false if an equal or later one already exists.
    pub async fn set_tombstone(&mut self, key: &str, at: DateTime<Utc>) -> Result<bool> {
        if !self.ledger().await?.record(key, at) {
            return Ok(false);
        }
        self.changes.push(Change::Tombstone(key.to_string(), at));
        Ok(true)
    }

    pub fn upsert(&mut self, item: T) {
        self.items
            .insert(item.key().to_string(), Some(item.clone()));
        self.changes.push(Change::Upsert(item));
    }

    pub fn delete(&mut self, key: &str) {
        self.items.insert(key.to_string(), None);
        self.changes.push(Change::Delete(key.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Commit every staged change in one store call. Returns the change count.
    pub async fn commit(self) -> Result<usize> {
        let count = self.changes.len();
        if count > 0 {
            self.store.commit(self.changes).await?;
        }
        Ok(count)
    }
}

struct CollectionState<T> {
    items: HashMap<String, T>,
    tombstones: TombstoneLedger,
}

/// In-memory keyed collection.
pub struct InMemoryCollection<T> {
    state: RwLock<CollectionState<T>>,
    fail_commits: AtomicBool,
}

impl<T> InMemoryCollection<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CollectionState {
                items: HashMap::new(),
                tombstones: TombstoneLedger::new(),
            }),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Seed with existing items.
    pub fn with_items(items: impl IntoIterator<Item = T>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().unwrap_or_else(|e| e.into_inner());
            for item in items {
                state.items.insert(item.key().to_string(), item);
            }
        }
        store
    }

    /// Make every following commit fail, for exercising error paths.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }
}

impl<T> Default for InMemoryCollection<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> CollectionStore<T> for InMemoryCollection<T>
where
    T: Keyed + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<T>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.items.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<T>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.items.values().cloned().collect())
    }

    async fn tombstones(&self) -> Result<TombstoneLedger> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.tombstones.clone())
    }

    async fn commit(&self, changes: Vec<Change<T>>) -> Result<()> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("commit rejected".into()));
        }
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let state = &mut *guard;
        apply_changes(&mut state.items, &mut state.tombstones, changes);
        Ok(())
    }
}

/// Apply changes to a map + ledger pair. Shared by store implementations.
pub fn apply_changes<T: Keyed>(
    items: &mut HashMap<String, T>,
    tombstones: &mut TombstoneLedger,
    changes: Vec<Change<T>>,
) {
    for change in changes {
        match change {
            Change::Upsert(item) => {
                items.insert(item.key().to_string(), item);
            }
            Change::Delete(key) => {
                items.remove(&key);
            }
            Change::Tombstone(key, at) => {
                tombstones.record(&key, at);
            }
        }
    }
}

/// In-memory watch-later queue.
#[derive(Default)]
pub struct InMemoryWatchLater {
    state: RwLock<WatchLater>,
    fail_saves: AtomicBool,
}

impl InMemoryWatchLater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: WatchLater) -> Self {
        Self {
            state: RwLock::new(state),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every following save fail, for exercising error paths.
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl WatchLaterStore for InMemoryWatchLater {
    async fn load(&self) -> Result<WatchLater> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    async fn save(&self, state: &WatchLater) -> Result<()> {
        if self.fail_saves.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("save rejected".into()));
        }
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Channel, Subscription};
    use crate::time::from_unix;

    fn sub(url: &str, created: i64) -> Subscription {
        Subscription::new(Channel::new(url, url), from_unix(created).unwrap())
    }

    #[tokio::test]
    async fn test_default_methods() {
        let store: InMemoryCollection<Subscription> = InMemoryCollection::new();
        store.upsert(sub("a", 1)).await.unwrap();
        assert!(store.get("a").await.unwrap().is_some());

        store.delete("a").await.unwrap();
        assert!(store.get("a").await.unwrap().is_none());

        store.set_tombstone("a", from_unix(9).unwrap()).await.unwrap();
        assert_eq!(store.tombstone("a").await.unwrap(), from_unix(9));
    }

    #[tokio::test]
    async fn test_commit_applies_items_and_tombstones_together() {
        let store = InMemoryCollection::with_items(vec![sub("a", 1)]);
        store
            .commit(vec![
                Change::Delete("a".into()),
                Change::Tombstone("a".into(), from_unix(5).unwrap()),
                Change::Upsert(sub("b", 6)),
            ])
            .await
            .unwrap();

        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
        assert_eq!(store.tombstone("a").await.unwrap(), from_unix(5));
    }

    #[tokio::test]
    async fn test_batch_reads_its_own_writes() {
        let store = InMemoryCollection::with_items(vec![sub("a", 1)]);
        let mut batch = Batch::new(&store as &dyn CollectionStore<Subscription>);

        batch.delete("a");
        batch.upsert(sub("b", 2));
        assert!(batch.get("a").await.unwrap().is_none());
        assert!(batch.get("b").await.unwrap().is_some());

        // Nothing visible before commit
        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());

        assert_eq!(batch.commit().await.unwrap(), 2);
        assert!(store.get("a").await.unwrap().is_none());
        assert!(store.get("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_skips_stale_tombstones() {
        let store: InMemoryCollection<Subscription> = InMemoryCollection::new();
        store.set_tombstone("a", from_unix(10).unwrap()).await.unwrap();

        let mut batch = Batch::new(&store as &dyn CollectionStore<Subscription>);
        assert!(!batch.set_tombstone("a", from_unix(5).unwrap()).await.unwrap());
        assert!(batch.is_empty());
        assert!(batch.set_tombstone("a", from_unix(15).unwrap()).await.unwrap());
        assert_eq!(batch.tombstone("a").await.unwrap(), from_unix(15));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_store_untouched() {
        let store = InMemoryCollection::with_items(vec![sub("a", 1)]);
        store.set_fail_commits(true);

        let mut batch = Batch::new(&store as &dyn CollectionStore<Subscription>);
        batch.delete("a");
        batch.upsert(sub("b", 2));
        assert!(batch.commit().await.is_err());

        assert!(store.get("a").await.unwrap().is_some());
        assert!(store.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_batch_does_not_touch_store() {
        let store: InMemoryCollection<Subscription> = InMemoryCollection::new();
        store.set_fail_commits(true);
        let batch = Batch::new(&store as &dyn CollectionStore<Subscription>);
        assert_eq!(batch.commit().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_watch_later_save_failure() {
        let store = InMemoryWatchLater::new();
        let mut state = store.load().await.unwrap();
        state.reorder_time = from_unix(50);
        store.set_fail_saves(true);
        assert!(store.save(&state).await.is_err());
        assert!(store.load().await.unwrap().reorder_time.is_none());
    }
}
