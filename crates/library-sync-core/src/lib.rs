//! library-sync-core: peer-to-peer reconciliation of a user's media library.
//!
//! This crate provides:
//! - Data model for the five synchronized collections
//! - Tombstone bookkeeping and per-collection last-writer-wins merges
//! - Per-peer history watermarks
//! - The handshake sent to a newly connected peer
//! - The envelope codec and hello frame used on the wire
//! - Store, watermark, and session trait abstractions

pub mod dispatch;
pub mod events;
pub mod handshake;
pub mod library;
pub mod merge;
pub mod models;
pub mod peer_id;
pub mod protocol;
pub mod session;
pub mod store;
pub mod time;
pub mod tombstone;
pub mod watermark;

pub use dispatch::Dispatched;
pub use events::{EventBus, Listener, Notification, SyncEvent};
pub use handshake::HandshakeReport;
pub use library::{Library, LibraryStores, SyncError};
pub use merge::MergeReport;
pub use peer_id::{PeerId, PeerIdError};
pub use protocol::{Hello, Opcode, SyncPacket};
pub use session::{SyncSession, TransportError};
pub use store::{Change, CollectionStore, StoreError, WatchLaterStore};
pub use tombstone::TombstoneLedger;
pub use watermark::WatermarkStore;
