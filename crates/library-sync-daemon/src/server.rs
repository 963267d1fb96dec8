//! Peer session management.
//!
//! Accepts incoming WebSocket connections and drives dialed ones. For every
//! established session the server:
//! 1. exchanges hello frames
//! 2. sends the handshake burst while already reading inbound frames
//! 3. merges each inbound frame into the library
//! 4. relays changed collections to the other connected sessions

use crate::connection::{exchange_hello, next_frame, WsSession, WsStream};
use anyhow::{bail, Result};
use futures::StreamExt;
use library_sync_core::protocol::Hello;
use library_sync_core::{Dispatched, Library, PeerId, SyncSession};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream};
use tracing::{debug, error, info, warn};

pub struct SyncServer {
    library: Arc<Library>,
    identity: PeerId,
    device_name: Option<String>,
    /// Established sessions indexed by connection ID. One peer may hold
    /// several connections.
    sessions: RwLock<HashMap<String, Arc<WsSession>>>,
    next_conn_id: AtomicU64,
}

impl SyncServer {
    pub fn new(library: Arc<Library>, identity: PeerId, device_name: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            library,
            identity,
            device_name,
            sessions: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }

    pub fn identity(&self) -> &PeerId {
        &self.identity
    }

    /// Bind to an address and return the TCP listener.
    pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
        let listener = TcpListener::bind(listen_addr).await?;
        info!("Listening for peers on {}", listen_addr);
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.accept_connection(stream, addr).await });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Upgrade an incoming TCP connection and run its session to completion.
    pub async fn accept_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let ws = match accept_async(MaybeTlsStream::Plain(stream)).await {
            Ok(ws) => ws,
            Err(e) => {
                // Health checks (like `nc -z`) connect and close without
                // completing the WebSocket upgrade.
                let err_str = e.to_string();
                if err_str.contains("Handshake not finished")
                    || err_str.contains("Connection reset")
                    || err_str.contains("unexpected EOF")
                {
                    debug!("Connection closed before upgrade from {}", addr);
                } else {
                    error!("WebSocket upgrade failed for {}: {}", addr, e);
                }
                return;
            }
        };

        if let Err(e) = self.run_session(ws, addr.to_string()).await {
            warn!("Session with {} ended: {}", addr, e);
        }
    }

    /// Dial `url` and run the session until it closes.
    pub async fn connect(self: Arc<Self>, url: &str) -> Result<()> {
        let (ws, _) = connect_async(url).await?;
        self.run_session(ws, url.to_string()).await
    }

    pub fn peer_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Identities of every connected peer, without duplicates.
    pub fn connected_peers(&self) -> Vec<PeerId> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<PeerId> = sessions.values().map(|s| s.remote_id().clone()).collect();
        peers.sort();
        peers.dedup();
        peers
    }

    fn hello(&self) -> Hello {
        Hello::new(self.identity.clone(), self.device_name.clone())
    }

    async fn run_session(self: Arc<Self>, mut ws: WsStream, origin: String) -> Result<()> {
        let hello = exchange_hello(&mut ws, &self.hello()).await?;
        if hello.should_warn_version() {
            warn!(
                "Peer {} speaks protocol version {}, continuing anyway",
                hello.display_name(),
                hello.version
            );
        }
        if hello.peer_id == self.identity {
            bail!("Refusing connection to ourselves via {}", origin);
        }

        let conn_id = format!("conn-{}", self.next_conn_id.fetch_add(1, Ordering::Relaxed));
        let (write, mut read) = ws.split();
        let session = Arc::new(WsSession::new(hello.peer_id.clone(), conn_id.clone(), write));
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(conn_id.clone(), Arc::clone(&session));
        info!(
            "Peer connected: {} via {} ({})",
            hello.display_name(),
            origin,
            conn_id
        );

        // Inbound frames are handled while the handshake burst is still going out.
        let handshake = {
            let library = Arc::clone(&self.library);
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                library.handshake(&*session).await;
            })
        };

        while let Some(frame) = next_frame(&mut read, &conn_id).await {
            self.on_frame(&session, &frame).await;
        }

        handshake.abort();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&conn_id);
        info!("Peer disconnected: {} ({})", hello.display_name(), conn_id);
        Ok(())
    }

    async fn on_frame(&self, session: &WsSession, frame: &[u8]) {
        let peer = session.remote_id().short();
        match self.library.dispatch_frame(session, frame).await {
            Ok(dispatched) => {
                if let Some(report) = &dispatched.report {
                    debug!(
                        "{} from {}: +{} ~{} -{}",
                        report.opcode, peer, report.added, report.updated, report.removed
                    );
                }
                if dispatched.has_changes() {
                    self.relay(session.conn_id(), &dispatched).await;
                }
            }
            Err(e) => {
                warn!("Failed to apply frame from {}: {}", peer, e);
            }
        }
    }

    /// Forward a changed collection to every session except the one it
    /// came from.
    async fn relay(&self, from_conn: &str, dispatched: &Dispatched) {
        let others: Vec<Arc<WsSession>> = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions
                .iter()
                .filter(|(conn_id, _)| conn_id.as_str() != from_conn)
                .map(|(_, session)| Arc::clone(session))
                .collect()
        };
        if others.is_empty() {
            return;
        }

        let opcode = dispatched.packet.opcode();
        // History has no snapshot form, so the received entries go out as-is.
        let packet = match self.library.snapshot(opcode).await {
            Ok(Some(packet)) => packet,
            Ok(None) => dispatched.packet.clone(),
            Err(e) => {
                error!("Failed to snapshot {} for relay: {}", opcode, e);
                return;
            }
        };

        let mut relayed = 0;
        for session in &others {
            match session.send_packet(&packet).await {
                Ok(()) => relayed += 1,
                Err(e) => warn!(
                    "Failed to relay {} to {}: {}",
                    opcode,
                    session.remote_id().short(),
                    e
                ),
            }
        }
        info!("Relayed {} to {} other peer(s)", opcode, relayed);
    }

    /// Close every open session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<WsSession>> = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions.values().cloned().collect()
        };
        for session in sessions {
            session.close().await;
        }
    }
}
