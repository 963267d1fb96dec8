//! Library: the local copy of every synchronized collection.
//!
//! Each collection's store sits behind its own async mutex. Every merge
//! handler and every local mutation takes that lock for the whole
//! read-compare-write sequence, so there is exactly one writer per collection
//! at a time. Locks are never held while a packet is being sent.

use crate::events::EventBus;
use crate::models::{
    Channel, HistoryEntry, Playlist, Subscription, SubscriptionGroup, VideoRef, WatchLater,
};
use crate::protocol::{
    CodecError, Opcode, PlaylistsPacket, SubscriptionGroupsPacket,
    SubscriptionsPacket, SyncPacket, WatchLaterPacket,
};
use crate::store::{
    Batch, CollectionStore, InMemoryCollection, InMemoryWatchLater, StoreError, WatchLaterStore,
};
use crate::tombstone::stamp_after;
use crate::watermark::{InMemoryWatermarks, WatermarkStore};
use crate::PeerId;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// The stores backing a [`Library`].
pub struct LibraryStores {
    pub subscriptions: Box<dyn CollectionStore<Subscription>>,
    pub groups: Box<dyn CollectionStore<SubscriptionGroup>>,
    pub playlists: Box<dyn CollectionStore<Playlist>>,
    pub watch_later: Box<dyn WatchLaterStore>,
    pub history: Box<dyn CollectionStore<HistoryEntry>>,
    pub watermarks: Box<dyn WatermarkStore>,
}

impl LibraryStores {
    pub fn in_memory() -> Self {
        Self {
            subscriptions: Box::new(InMemoryCollection::new()),
            groups: Box::new(InMemoryCollection::new()),
            playlists: Box::new(InMemoryCollection::new()),
            watch_later: Box::new(InMemoryWatchLater::new()),
            history: Box::new(InMemoryCollection::new()),
            watermarks: Box::new(InMemoryWatermarks::new()),
        }
    }
}

pub struct Library {
    pub(crate) subscriptions: Mutex<Box<dyn CollectionStore<Subscription>>>,
    pub(crate) groups: Mutex<Box<dyn CollectionStore<SubscriptionGroup>>>,
    pub(crate) playlists: Mutex<Box<dyn CollectionStore<Playlist>>>,
    pub(crate) watch_later: Mutex<Box<dyn WatchLaterStore>>,
    pub(crate) history: Mutex<Box<dyn CollectionStore<HistoryEntry>>>,
    pub(crate) watermarks: Mutex<Box<dyn WatermarkStore>>,
    pub(crate) events: Arc<EventBus>,
    clock: Clock,
}

impl Library {
    pub fn new(stores: LibraryStores) -> Self {
        Self {
            subscriptions: Mutex::new(stores.subscriptions),
            groups: Mutex::new(stores.groups),
            playlists: Mutex::new(stores.playlists),
            watch_later: Mutex::new(stores.watch_later),
            history: Mutex::new(stores.history),
            watermarks: Mutex::new(stores.watermarks),
            events: Arc::new(EventBus::new()),
            clock: Arc::new(Utc::now),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(LibraryStores::in_memory())
    }

    /// Replace the wall clock used for local mutations.
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // ==================== Subscriptions ====================

    pub async fn subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.lock().await.list().await?)
    }

    pub async fn is_subscribed(&self, url: &str) -> Result<bool> {
        Ok(self.subscriptions.lock().await.get(url).await?.is_some())
    }

    /// Subscribe to a channel. Returns the existing subscription if present.
    pub async fn subscribe(&self, channel: Channel) -> Result<Subscription> {
        let store = self.subscriptions.lock().await;
        if let Some(existing) = store.get(&channel.url).await? {
            return Ok(existing);
        }
        // A re-subscription has to outlive the tombstone on every peer
        let created = stamp_after(self.now(), store.tombstone(&channel.url).await?);
        let subscription = Subscription::new(channel, created);
        store.upsert(subscription.clone()).await?;
        debug!("Subscribed to {}", subscription.url());
        Ok(subscription)
    }

    /// Unsubscribe and record a tombstone. Returns false if not subscribed.
    pub async fn unsubscribe(&self, url: &str) -> Result<bool> {
        let store = self.subscriptions.lock().await;
        let mut batch = Batch::new(&**store);
        let Some(existing) = batch.get(url).await? else {
            return Ok(false);
        };
        batch.delete(url);
        let removed = stamp_after(self.now(), Some(existing.creation_time));
        batch.set_tombstone(url, removed).await?;
        batch.commit().await?;
        debug!("Unsubscribed from {}", url);
        Ok(true)
    }

    // ==================== Subscription groups ====================

    pub async fn groups(&self) -> Result<Vec<SubscriptionGroup>> {
        Ok(self.groups.lock().await.list().await?)
    }

    /// Create or update a group, stamping its last-change time.
    pub async fn save_group(&self, mut group: SubscriptionGroup) -> Result<SubscriptionGroup> {
        let store = self.groups.lock().await;
        let previous = store.get(&group.id).await?.map(|g| g.last_change);
        group.last_change = stamp_after(self.now(), previous);
        store.upsert(group.clone()).await?;
        Ok(group)
    }

    pub async fn remove_group(&self, id: &str) -> Result<bool> {
        let store = self.groups.lock().await;
        let mut batch = Batch::new(&**store);
        let Some(existing) = batch.get(id).await? else {
            return Ok(false);
        };
        batch.delete(id);
        let removed = stamp_after(self.now(), Some(existing.creation_time));
        batch.set_tombstone(id, removed).await?;
        batch.commit().await?;
        Ok(true)
    }

    // ==================== Playlists ====================

    pub async fn playlists(&self) -> Result<Vec<Playlist>> {
        Ok(self.playlists.lock().await.list().await?)
    }

    /// Create or update a playlist, stamping its update time.
    pub async fn save_playlist(&self, mut playlist: Playlist) -> Result<Playlist> {
        let store = self.playlists.lock().await;
        let previous = store.get(&playlist.id).await?.map(|p| p.date_update);
        playlist.date_update = stamp_after(self.now(), previous);
        store.upsert(playlist.clone()).await?;
        Ok(playlist)
    }

    pub async fn remove_playlist(&self, id: &str) -> Result<bool> {
        let store = self.playlists.lock().await;
        let mut batch = Batch::new(&**store);
        let Some(existing) = batch.get(id).await? else {
            return Ok(false);
        };
        batch.delete(id);
        let removed = stamp_after(self.now(), Some(existing.date_creation));
        batch.set_tombstone(id, removed).await?;
        batch.commit().await?;
        Ok(true)
    }

    // ==================== Watch later ====================

    pub async fn watch_later(&self) -> Result<WatchLater> {
        Ok(self.watch_later.lock().await.load().await?)
    }

    /// Append a video. Returns false if it was already queued.
    pub async fn add_to_watch_later(&self, video: VideoRef) -> Result<bool> {
        let store = self.watch_later.lock().await;
        let mut state = store.load().await?;
        let url = video.url.clone();
        if !state.insert(video) {
            return Ok(false);
        }
        let added = stamp_after(self.now(), state.removed.get(&url).copied());
        state.added.insert(url, added);
        store.save(&state).await?;
        Ok(true)
    }

    /// Remove a video and record the removal time.
    pub async fn remove_from_watch_later(&self, url: &str) -> Result<bool> {
        let store = self.watch_later.lock().await;
        let mut state = store.load().await?;
        if state.remove(url).is_none() {
            return Ok(false);
        }
        let removed = stamp_after(self.now(), state.added.get(url).copied());
        state.record_removal(url, removed);
        store.save(&state).await?;
        Ok(true)
    }

    /// Replace the user ordering wholesale.
    pub async fn reorder_watch_later(&self, order: Vec<String>) -> Result<()> {
        let store = self.watch_later.lock().await;
        let mut state = store.load().await?;
        state.order = order;
        state.reorder_time = Some(stamp_after(self.now(), state.reorder_time));
        store.save(&state).await?;
        Ok(())
    }

    // ==================== History ====================

    /// Record playback progress for a video.
    pub async fn record_progress(&self, video: VideoRef, position_secs: u64) -> Result<HistoryEntry> {
        let entry = HistoryEntry::new(video, position_secs, self.now());
        self.history.lock().await.upsert(entry.clone()).await?;
        Ok(entry)
    }

    /// History entries watched strictly after `after`, oldest first.
    pub async fn history_since(&self, after: Option<DateTime<Utc>>) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self
            .history
            .lock()
            .await
            .list()
            .await?
            .into_iter()
            .filter(|e| after.is_none_or(|mark| e.date > mark))
            .collect();
        entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.video.url.cmp(&b.video.url)));
        Ok(entries)
    }

    pub async fn watermark(&self, peer: &PeerId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermarks.lock().await.get(peer).await?)
    }

    // ==================== Outbound snapshots ====================

    pub async fn subscriptions_packet(&self) -> Result<SubscriptionsPacket> {
        let store = self.subscriptions.lock().await;
        let mut subscriptions: Vec<Subscription> =
            store.list().await?.iter().map(Subscription::for_peer).collect();
        subscriptions.sort_by(|a, b| a.url().cmp(b.url()));
        Ok(SubscriptionsPacket {
            subscriptions,
            subscription_removals: store.tombstones().await?.to_unix_map(),
        })
    }

    pub async fn groups_packet(&self) -> Result<SubscriptionGroupsPacket> {
        let store = self.groups.lock().await;
        let mut groups = store.list().await?;
        groups.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(SubscriptionGroupsPacket {
            groups,
            group_removals: store.tombstones().await?.to_unix_map(),
        })
    }

    pub async fn playlists_packet(&self) -> Result<PlaylistsPacket> {
        let store = self.playlists.lock().await;
        let mut playlists: Vec<Playlist> =
            store.list().await?.iter().map(Playlist::for_peer).collect();
        playlists.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(PlaylistsPacket {
            playlists,
            playlist_removals: store.tombstones().await?.to_unix_map(),
        })
    }

    pub async fn watch_later_packet(&self) -> Result<WatchLaterPacket> {
        let state = self.watch_later.lock().await.load().await?;
        Ok(WatchLaterPacket::from_state(&state))
    }

    /// Full snapshot of one collection, for relaying merged state to other
    /// peers. History and send-to-device have no snapshot form.
    pub async fn snapshot(&self, opcode: Opcode) -> Result<Option<SyncPacket>> {
        let packet = match opcode {
            Opcode::SyncSubscriptions => SyncPacket::Subscriptions(self.subscriptions_packet().await?),
            Opcode::SyncSubscriptionGroups => {
                SyncPacket::SubscriptionGroups(self.groups_packet().await?)
            }
            Opcode::SyncPlaylists => SyncPacket::Playlists(self.playlists_packet().await?),
            Opcode::SyncWatchLater => SyncPacket::WatchLater(self.watch_later_packet().await?),
            Opcode::SyncHistory | Opcode::SendToDevice => return Ok(None),
        };
        Ok(Some(packet))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{library_at, t};
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_subscribe_is_idempotent() {
        let (library, _) = library_at(100);
        let first = library.subscribe(Channel::new("a", "A")).await.unwrap();
        let second = library.subscribe(Channel::new("a", "A")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(library.subscriptions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_records_tombstone() {
        let (library, now) = library_at(100);
        library.subscribe(Channel::new("a", "A")).await.unwrap();
        now.store(150, Ordering::SeqCst);

        assert!(library.unsubscribe("a").await.unwrap());
        assert!(!library.unsubscribe("a").await.unwrap());
        assert!(!library.is_subscribed("a").await.unwrap());

        let packet = library.subscriptions_packet().await.unwrap();
        assert!(packet.subscriptions.is_empty());
        assert_eq!(packet.subscription_removals.get("a"), Some(&150));
    }

    #[tokio::test]
    async fn test_remove_group_and_playlist_record_tombstones() {
        let (library, now) = library_at(100);
        let group = library
            .save_group(SubscriptionGroup::new("News", t(100)))
            .await
            .unwrap();
        let playlist = library.save_playlist(Playlist::new("Mix", t(100))).await.unwrap();
        now.store(200, Ordering::SeqCst);

        assert!(library.remove_group(&group.id).await.unwrap());
        assert!(library.remove_playlist(&playlist.id).await.unwrap());
        assert!(!library.remove_playlist("missing").await.unwrap());

        let groups = library.groups_packet().await.unwrap();
        assert!(groups.groups.is_empty());
        assert_eq!(groups.group_removals.get(&group.id), Some(&200));

        let playlists = library.playlists_packet().await.unwrap();
        assert_eq!(playlists.playlist_removals.get(&playlist.id), Some(&200));
    }

    #[tokio::test]
    async fn test_watch_later_local_operations() {
        let (library, now) = library_at(100_000);
        assert!(library.add_to_watch_later(VideoRef::new("x", "X")).await.unwrap());
        assert!(library.add_to_watch_later(VideoRef::new("y", "Y")).await.unwrap());
        assert!(!library.add_to_watch_later(VideoRef::new("x", "X")).await.unwrap());

        now.store(100_050, Ordering::SeqCst);
        library
            .reorder_watch_later(vec!["y".into(), "x".into()])
            .await
            .unwrap();

        now.store(100_060, Ordering::SeqCst);
        assert!(library.remove_from_watch_later("x").await.unwrap());

        let state = library.watch_later().await.unwrap();
        assert_eq!(state.order, vec!["y".to_string()]);
        assert_eq!(state.reorder_time, Some(t(100_050)));
        assert_eq!(state.removed.get("x"), Some(&t(100_060)));
        assert_eq!(state.added.get("y"), Some(&t(100_000)));
    }

    #[tokio::test]
    async fn test_history_since_is_sorted_and_strict() {
        let (library, now) = library_at(10);
        library.record_progress(VideoRef::new("b", "B"), 5).await.unwrap();
        now.store(20, Ordering::SeqCst);
        library.record_progress(VideoRef::new("a", "A"), 7).await.unwrap();

        let all = library.history_since(None).await.unwrap();
        let urls: Vec<_> = all.iter().map(|e| e.video.url.as_str()).collect();
        assert_eq!(urls, vec!["b", "a"]);

        let newer = library.history_since(Some(t(10))).await.unwrap();
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].video.url, "a");
    }

    #[tokio::test]
    async fn test_outbound_snapshots_strip_private_fields() {
        let (library, _) = library_at(100);
        let mut sub = library.subscribe(Channel::new("a", "A")).await.unwrap();
        sub.stats.play_count = 3;
        library.subscriptions.lock().await.upsert(sub).await.unwrap();

        let mut playlist = Playlist::new("Mix", t(100));
        playlist.date_last_played = Some(t(150));
        library.save_playlist(playlist).await.unwrap();

        let subs = library.subscriptions_packet().await.unwrap();
        assert!(subs.subscriptions[0].stats.is_empty());
        let playlists = library.playlists_packet().await.unwrap();
        assert!(playlists.playlists[0].date_last_played.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_per_opcode() {
        let library = Library::in_memory();
        assert!(matches!(
            library.snapshot(Opcode::SyncSubscriptions).await.unwrap(),
            Some(SyncPacket::Subscriptions(_))
        ));
        assert!(matches!(
            library.snapshot(Opcode::SyncWatchLater).await.unwrap(),
            Some(SyncPacket::WatchLater(_))
        ));
        assert!(library.snapshot(Opcode::SyncHistory).await.unwrap().is_none());
        assert!(library.snapshot(Opcode::SendToDevice).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_second_readd_converges_between_peers() {
        let (a, _) = library_at(100_000);
        let (b, _) = library_at(100_000);
        let a_id = crate::PeerId::generate();
        let b_id = crate::PeerId::generate();

        a.subscribe(Channel::new("c", "C")).await.unwrap();
        a.add_to_watch_later(VideoRef::new("v", "V")).await.unwrap();
        b.merge_subscriptions(&a_id, &a.subscriptions_packet().await.unwrap())
            .await
            .unwrap();
        b.merge_watch_later(&a_id, &a.watch_later_packet().await.unwrap())
            .await
            .unwrap();

        // Remove and re-add without the clock moving
        assert!(a.unsubscribe("c").await.unwrap());
        a.subscribe(Channel::new("c", "C")).await.unwrap();
        assert!(a.remove_from_watch_later("v").await.unwrap());
        assert!(a.add_to_watch_later(VideoRef::new("v", "V")).await.unwrap());

        for _ in 0..3 {
            b.merge_subscriptions(&a_id, &a.subscriptions_packet().await.unwrap())
                .await
                .unwrap();
            a.merge_subscriptions(&b_id, &b.subscriptions_packet().await.unwrap())
                .await
                .unwrap();
            b.merge_watch_later(&a_id, &a.watch_later_packet().await.unwrap())
                .await
                .unwrap();
            a.merge_watch_later(&b_id, &b.watch_later_packet().await.unwrap())
                .await
                .unwrap();
        }

        assert!(a.is_subscribed("c").await.unwrap());
        assert!(b.is_subscribed("c").await.unwrap());
        assert!(a.watch_later().await.unwrap().contains("v"));
        assert!(b.watch_later().await.unwrap().contains("v"));
    }
}
