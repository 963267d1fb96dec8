//! WebSocket sessions with peers.
//!
//! Every connection, accepted or dialed, starts with both sides sending a
//! [`Hello`] frame. After that each binary frame is one envelope:
//! `[opcode][flags][body]`.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use library_sync_core::protocol::{hello::is_likely_hello, Hello, Opcode};
use library_sync_core::session::{self, SyncSession, TransportError};
use library_sync_core::PeerId;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

/// Maximum frame size (50MB) to prevent memory exhaustion from malicious peers.
pub const MAX_FRAME_SIZE: usize = 50 * 1024 * 1024;

/// How long to wait for the remote hello after connecting.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Accepted and dialed connections share one stream type.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWriter = SplitSink<WsStream, Message>;
pub type WsReader = SplitStream<WsStream>;

/// Send our hello and wait for the peer's.
pub async fn exchange_hello(ws: &mut WsStream, ours: &Hello) -> Result<Hello> {
    ws.send(Message::Binary(ours.to_json().into())).await?;

    let wait = async {
        loop {
            let data = match ws.next().await {
                Some(Ok(Message::Binary(data))) => data.to_vec(),
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Close(_))) | None => bail!("Connection closed before hello"),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            };
            return Hello::from_json(&data)
                .ok_or_else(|| anyhow!("Expected hello frame, got {} bytes", data.len()));
        }
    };

    timeout(HELLO_TIMEOUT, wait)
        .await
        .map_err(|_| anyhow!("Timed out waiting for hello"))?
}

/// Read the next envelope frame. Returns `None` once the connection is done.
pub async fn next_frame(read: &mut WsReader, label: &str) -> Option<Vec<u8>> {
    loop {
        let data = match read.next().await {
            Some(Ok(Message::Binary(data))) => data.to_vec(),
            Some(Ok(Message::Text(text))) => text.into_bytes(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                continue;
            }
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame from {}", label);
                return None;
            }
            Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                debug!("Connection {} closed", label);
                return None;
            }
            Some(Err(e)) => {
                error!("WebSocket error on {}: {}", label, e);
                return None;
            }
            None => {
                debug!("Connection {} stream ended", label);
                return None;
            }
        };

        if data.len() > MAX_FRAME_SIZE {
            warn!(
                "Frame from {} exceeds max size ({} > {}), dropping",
                label,
                data.len(),
                MAX_FRAME_SIZE
            );
            continue;
        }
        if is_likely_hello(&data) {
            debug!("Ignoring repeated hello from {}", label);
            continue;
        }
        return Some(data);
    }
}

/// The write half of an established connection, usable by the core as a
/// [`SyncSession`].
pub struct WsSession {
    remote: PeerId,
    conn_id: String,
    write: Mutex<WsWriter>,
}

impl WsSession {
    pub fn new(remote: PeerId, conn_id: String, write: WsWriter) -> Self {
        Self {
            remote,
            conn_id,
            write: Mutex::new(write),
        }
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    /// Send a close frame. Errors are ignored; the peer may already be gone.
    pub async fn close(&self) {
        let _ = self.write.lock().await.send(Message::Close(None)).await;
    }
}

#[async_trait]
impl SyncSession for WsSession {
    fn remote_id(&self) -> &PeerId {
        &self.remote
    }

    async fn send(&self, opcode: Opcode, payload: Vec<u8>) -> session::Result<()> {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(opcode.as_u8());
        frame.extend_from_slice(&payload);

        let mut write = self.write.lock().await;
        write
            .send(Message::Binary(frame.into()))
            .await
            .map_err(|e| match e {
                WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
                other => TransportError::SendFailed(other.to_string()),
            })
    }
}
