//! Library data model: the five synchronized collections and their items.
//!
//! Wire field names are camelCase and wire timestamps are unix seconds, so the
//! same structs serve as packet payloads and as persisted records. Fields that
//! are private to one device are stripped by the `for_peer` helpers before a
//! value leaves the device.

mod group;
mod history;
mod playlist;
mod subscription;
mod video;
mod watch_later;

pub use group::SubscriptionGroup;
pub use history::HistoryEntry;
pub use playlist::Playlist;
pub use subscription::{FetchFlags, Subscription, SubscriptionStats};
pub use video::{Channel, VideoRef};
pub use watch_later::WatchLater;

/// An item stored in a keyed collection.
///
/// The key is stable across devices and is what tombstones refer to.
pub trait Keyed {
    fn key(&self) -> &str;
}
