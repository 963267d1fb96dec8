//! JSON-file persistence for the library.
//!
//! Layout inside the data directory:
//! - `identity.json` - this device's public identity
//! - `subscriptions.json`, `groups.json`, `playlists.json`, `history.json` -
//!   items plus tombstones for each keyed collection
//! - `watch_later.json` - the watch-later queue
//! - `watermarks.json` - per-peer history watermarks
//!
//! Files are read once, synchronously, when the stores are opened. Every write
//! goes through `tokio::fs` to a temporary file that is then renamed over the
//! original. The in-memory copy is only replaced after the rename succeeds,
//! so a failed commit leaves both untouched.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use library_sync_core::models::{Keyed, WatchLater};
use library_sync_core::store::{self, apply_changes, Change, CollectionStore, StoreError, WatchLaterStore};
use library_sync_core::{LibraryStores, PeerId, TombstoneLedger, WatermarkStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::info;

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> store::Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path).map_err(|e| StoreError::Io(e.to_string()))?;
    serde_json::from_str(&contents).map_err(|e| StoreError::Serialization(e.to_string()))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> store::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;
    }
    let contents =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(())
}

// ==================== Keyed collections ====================

/// On-disk form of a keyed collection.
#[derive(Debug, Serialize, Deserialize)]
struct CollectionFile<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    tombstones: TombstoneLedger,
}

impl<T> Default for CollectionFile<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            tombstones: TombstoneLedger::new(),
        }
    }
}

struct CollectionState<T> {
    items: HashMap<String, T>,
    tombstones: TombstoneLedger,
}

/// A keyed collection stored as one JSON file.
pub struct JsonCollection<T> {
    path: PathBuf,
    state: Mutex<CollectionState<T>>,
}

impl<T> JsonCollection<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn open(path: impl Into<PathBuf>) -> store::Result<Self> {
        let path = path.into();
        let file: CollectionFile<T> = read_json(&path)?;
        let items = file
            .items
            .into_iter()
            .map(|item| (item.key().to_string(), item))
            .collect();
        Ok(Self {
            path,
            state: Mutex::new(CollectionState {
                items,
                tombstones: file.tombstones,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T> CollectionStore<T> for JsonCollection<T>
where
    T: Keyed + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> store::Result<Option<T>> {
        Ok(self.state.lock().await.items.get(key).cloned())
    }

    async fn list(&self) -> store::Result<Vec<T>> {
        Ok(self.state.lock().await.items.values().cloned().collect())
    }

    async fn tombstones(&self) -> store::Result<TombstoneLedger> {
        Ok(self.state.lock().await.tombstones.clone())
    }

    async fn commit(&self, changes: Vec<Change<T>>) -> store::Result<()> {
        // Held across the write so commits land on disk in order
        let mut state = self.state.lock().await;
        let mut items = state.items.clone();
        let mut tombstones = state.tombstones.clone();
        apply_changes(&mut items, &mut tombstones, changes);

        let mut sorted: Vec<T> = items.values().cloned().collect();
        sorted.sort_by(|a, b| a.key().cmp(b.key()));
        write_json(
            &self.path,
            &CollectionFile {
                items: sorted,
                tombstones: tombstones.clone(),
            },
        )
        .await?;

        state.items = items;
        state.tombstones = tombstones;
        Ok(())
    }
}

// ==================== Watch later ====================

pub struct JsonWatchLater {
    path: PathBuf,
    state: Mutex<WatchLater>,
}

impl JsonWatchLater {
    pub fn open(path: impl Into<PathBuf>) -> store::Result<Self> {
        let path = path.into();
        let state = read_json(&path)?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }
}

#[async_trait]
impl WatchLaterStore for JsonWatchLater {
    async fn load(&self) -> store::Result<WatchLater> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &WatchLater) -> store::Result<()> {
        let mut current = self.state.lock().await;
        write_json(&self.path, state).await?;
        *current = state.clone();
        Ok(())
    }
}

// ==================== Watermarks ====================

pub struct JsonWatermarks {
    path: PathBuf,
    marks: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl JsonWatermarks {
    pub fn open(path: impl Into<PathBuf>) -> store::Result<Self> {
        let path = path.into();
        let marks = read_json(&path)?;
        Ok(Self {
            path,
            marks: Mutex::new(marks),
        })
    }
}

#[async_trait]
impl WatermarkStore for JsonWatermarks {
    async fn get(&self, peer: &PeerId) -> store::Result<Option<DateTime<Utc>>> {
        Ok(self.marks.lock().await.get(peer.as_str()).copied())
    }

    async fn set(&self, peer: &PeerId, at: DateTime<Utc>) -> store::Result<()> {
        let mut marks = self.marks.lock().await;
        let mut updated = marks.clone();
        updated.insert(peer.to_string(), at);
        write_json(&self.path, &updated).await?;
        *marks = updated;
        Ok(())
    }
}

// ==================== Library + identity ====================

/// Open (or create) every store in `data_dir`.
pub fn open_library_stores(data_dir: &Path) -> store::Result<LibraryStores> {
    Ok(LibraryStores {
        subscriptions: Box::new(JsonCollection::open(data_dir.join("subscriptions.json"))?),
        groups: Box::new(JsonCollection::open(data_dir.join("groups.json"))?),
        playlists: Box::new(JsonCollection::open(data_dir.join("playlists.json"))?),
        watch_later: Box::new(JsonWatchLater::open(data_dir.join("watch_later.json"))?),
        history: Box::new(JsonCollection::open(data_dir.join("history.json"))?),
        watermarks: Box::new(JsonWatermarks::open(data_dir.join("watermarks.json"))?),
    })
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityFile {
    peer_id: PeerId,
    #[serde(with = "chrono::serde::ts_seconds")]
    created_at: DateTime<Utc>,
}

/// Load this device's identity, generating and saving one on first run.
pub async fn load_or_create_identity(data_dir: &Path) -> Result<PeerId> {
    let path = data_dir.join("identity.json");
    if path.exists() {
        let contents = tokio::fs::read_to_string(&path).await?;
        let identity: IdentityFile = serde_json::from_str(&contents)?;
        return Ok(identity.peer_id);
    }

    let identity = IdentityFile {
        peer_id: PeerId::generate(),
        created_at: Utc::now(),
    };
    write_json(&path, &identity).await?;
    info!("Generated device identity {}", identity.peer_id.short());
    Ok(identity.peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use library_sync_core::models::{Channel, Subscription, VideoRef};
    use library_sync_core::time::from_unix;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Utc> {
        from_unix(secs).unwrap()
    }

    #[tokio::test]
    async fn test_collection_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.json");

        {
            let store = JsonCollection::<Subscription>::open(&path).unwrap();
            store
                .commit(vec![
                    Change::Upsert(Subscription::new(Channel::new("a", "A"), t(10))),
                    Change::Tombstone("b".into(), t(20)),
                ])
                .await
                .unwrap();
        }

        let store = JsonCollection::<Subscription>::open(&path).unwrap();
        assert!(store.get("a").await.unwrap().is_some());
        assert_eq!(store.tombstones().await.unwrap().get("b"), Some(t(20)));
        assert!(!dir.path().join("subscriptions.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_state() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("groups.json");
        let store = JsonCollection::<Subscription>::open(&path).unwrap();
        fs::create_dir_all(&path).unwrap();

        let result = store
            .commit(vec![Change::Upsert(Subscription::new(Channel::new("a", "A"), t(10)))])
            .await;
        assert!(result.is_err());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_commits_all_reach_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subscriptions.json");
        let store = Arc::new(JsonCollection::<Subscription>::open(&path).unwrap());

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let channel = Channel::new(format!("c{i}"), format!("C{i}"));
                    store
                        .commit(vec![Change::Upsert(Subscription::new(channel, t(10 + i)))])
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let reopened = JsonCollection::<Subscription>::open(&path).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_watch_later_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watch_later.json");

        let mut state = WatchLater::default();
        state.insert(VideoRef::new("x", "X"));
        state.reorder_time = Some(t(100));
        JsonWatchLater::open(&path).unwrap().save(&state).await.unwrap();

        let reopened = JsonWatchLater::open(&path).unwrap();
        assert_eq!(reopened.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_watermarks_persist_per_peer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("watermarks.json");
        let peer = PeerId::generate();

        JsonWatermarks::open(&path).unwrap().set(&peer, t(42)).await.unwrap();

        let reopened = JsonWatermarks::open(&path).unwrap();
        assert_eq!(reopened.get(&peer).await.unwrap(), Some(t(42)));
        assert_eq!(reopened.get(&PeerId::generate()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_identity_is_stable() {
        let dir = TempDir::new().unwrap();
        let first = load_or_create_identity(dir.path()).await.unwrap();
        let second = load_or_create_identity(dir.path()).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playlists.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonCollection::<Subscription>::open(&path),
            Err(StoreError::Serialization(_))
        ));
    }
}
