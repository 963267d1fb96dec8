//! SyncSession trait: the core's view of one connected peer.
//!
//! The transport (connection setup, authentication, framing) lives outside
//! this crate. All the merge and handshake code needs is the remote identity
//! and a way to push a payload onto a sub-channel.
//!
//! Implementations:
//! - `WsSession` (in library-sync-daemon) - WebSocket binary frames

use crate::PeerId;
use crate::protocol::{self, CodecError, Opcode, SyncPacket};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Session closed")]
    Closed,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Encode failed: {0}")]
    Encode(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// An established session with one remote device.
#[async_trait]
pub trait SyncSession: Send + Sync {
    /// Authenticated public identity of the remote device.
    fn remote_id(&self) -> &PeerId;

    /// Send a `[flags][body]` payload on a sub-channel.
    async fn send(&self, opcode: Opcode, payload: Vec<u8>) -> Result<()>;

    /// Encode and send a packet.
    async fn send_packet(&self, packet: &SyncPacket) -> Result<()> {
        let (opcode, payload) = protocol::encode_payload(packet)?;
        self.send(opcode, payload).await
    }
}
