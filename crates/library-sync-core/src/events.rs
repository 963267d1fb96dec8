//! Event infrastructure for library sync.
//!
//! Merge handlers never block on the UI. Anything a user (or another local
//! component) should hear about is published as a [`SyncEvent`] on the
//! [`EventBus`]; listeners decide how to present it.

use crate::merge::MergeReport;
use crate::peer_id::PeerId;
use crate::protocol::Opcode;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

/// Above this many items a notification collapses to a count.
pub const NOTIFY_LIST_LIMIT: usize = 3;

/// Batched user-facing notification body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Notification {
    /// A short list of item names.
    Names { names: Vec<String> },
    /// Too many items to list.
    Count { count: usize },
}

impl Notification {
    /// Summarize a batch of item names. Returns `None` for an empty batch.
    pub fn summarize(names: Vec<String>) -> Option<Self> {
        match names.len() {
            0 => None,
            n if n > NOTIFY_LIST_LIMIT => Some(Self::Count { count: n }),
            _ => Some(Self::Names { names }),
        }
    }

    /// Render as a single line, e.g. "Added 4 subscriptions" or
    /// "Added subscriptions: A, B".
    pub fn message(&self, verb: &str, noun: &str) -> String {
        match self {
            Self::Count { count } => format!("{verb} {count} {noun}"),
            Self::Names { names } => format!("{verb} {noun}: {}", names.join(", ")),
        }
    }
}

/// Events emitted while syncing with peers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// Subscriptions accepted from a peer.
    SubscriptionsAdded {
        peer: PeerId,
        notification: Notification,
    },
    /// Subscriptions removed because of a peer's tombstones.
    SubscriptionsRemoved {
        peer: PeerId,
        notification: Notification,
    },
    /// An inbound packet changed a collection.
    CollectionMerged { peer: PeerId, report: MergeReport },
    /// Watch-later state should be pushed to other local listeners.
    WatchLaterBroadcast { peer: PeerId },
    /// A peer asked this device to open a video.
    SendToDevice {
        peer: PeerId,
        url: String,
        #[serde(rename = "position")]
        position_secs: u64,
    },
    /// The history watermark for a peer moved forward.
    WatermarkAdvanced {
        peer: PeerId,
        /// Unix seconds.
        timestamp: i64,
    },
    /// The handshake burst for a new session finished.
    HandshakeCompleted {
        peer: PeerId,
        sent: Vec<Opcode>,
        failed: Vec<Opcode>,
    },
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Listener handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it to stop.
pub struct Listener {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing sync events to listeners.
///
/// Wrap in `Arc` to enable subscriptions.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    /// Listeners dropped while the callback list was locked.
    pending_removals: Mutex<Vec<usize>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns a [`Listener`] that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Listener {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // Drop may run while emit holds the read lock, so never block here
        match self.callbacks.try_write() {
            Ok(mut guard) => guard.retain(|(i, _)| *i != id),
            Err(_) => self
                .pending_removals
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(id),
        }
    }

    fn apply_pending_removals(&self) {
        let pending = {
            let mut guard = self.pending_removals.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            return;
        }
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| !pending.contains(i));
    }

    /// Emit an event to all listeners.
    pub fn emit(&self, event: SyncEvent) {
        self.apply_pending_removals();
        // Snapshot the list so a callback may subscribe without deadlocking
        let callbacks: Vec<Callback> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerId {
        PeerId::generate()
    }

    fn broadcast(peer: &PeerId) -> SyncEvent {
        SyncEvent::WatchLaterBroadcast { peer: peer.clone() }
    }

    #[test]
    fn test_summarize_lists_small_batches() {
        let n = Notification::summarize(vec!["A".into(), "B".into()]).unwrap();
        assert_eq!(
            n,
            Notification::Names {
                names: vec!["A".into(), "B".into()]
            }
        );
        assert_eq!(n.message("Added", "subscriptions"), "Added subscriptions: A, B");
    }

    #[test]
    fn test_summarize_counts_large_batches() {
        let names: Vec<String> = (0..=NOTIFY_LIST_LIMIT).map(|i| i.to_string()).collect();
        let n = Notification::summarize(names).unwrap();
        assert_eq!(n, Notification::Count { count: 4 });
        assert_eq!(n.message("Removed", "subscriptions"), "Removed 4 subscriptions");
    }

    #[test]
    fn test_summarize_empty() {
        assert!(Notification::summarize(vec![]).is_none());
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _listener = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(broadcast(&peer()));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_listener_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let p = peer();

        {
            let _listener = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(broadcast(&p));
        }

        bus.emit(broadcast(&p));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_listener_dropped_during_emit_is_removed() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let listener = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        {
            // Same state emit is in while it snapshots the list
            let _reading = bus.callbacks.read().unwrap();
            drop(listener);
        }
        assert_eq!(bus.pending_removals.lock().unwrap().len(), 1);

        bus.emit(broadcast(&peer()));
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert!(bus.callbacks.read().unwrap().is_empty());
    }

    #[test]
    fn test_event_serialization() {
        let event = SyncEvent::SendToDevice {
            peer: peer(),
            url: "https://v/1".into(),
            position_secs: 42,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"sendToDevice\""));
        assert!(json.contains("\"position\":42"));
    }
}
