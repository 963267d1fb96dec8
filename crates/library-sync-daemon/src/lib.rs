//! library-sync-daemon library: exposes the daemon components for testing.
//!
//! This is a thin layer over library-sync-core that adds WebSocket
//! transport, JSON-file storage and command-line configuration.

pub mod config;
pub mod connection;
pub mod outgoing;
pub mod persistence;
pub mod server;

// Re-export key types for convenience
pub use config::{Args, ConfigError, DaemonConfig};
pub use connection::{WsSession, MAX_FRAME_SIZE};
pub use outgoing::{spawn_dialer, ReconnectConfig};
pub use persistence::{load_or_create_identity, open_library_stores};
pub use server::SyncServer;
