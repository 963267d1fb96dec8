//! Handshake: the burst of snapshots sent when a session starts.
//!
//! Order on the wire:
//!
//! 1. Subscriptions + tombstones
//! 2. Subscription groups + tombstones
//! 3. Playlists + tombstones
//! 4. Watch-later (members, add/removal maps, ordering, reorder time),
//!    followed by a local [`SyncEvent::WatchLaterBroadcast`]
//! 5. History newer than the peer's watermark, skipped when empty
//!
//! Each step is independent. A snapshot that cannot be built or a send that
//! fails is logged and the remaining steps still run. No collection lock is
//! held while a send is in flight.

use crate::events::SyncEvent;
use crate::library::{Library, Result};
use crate::protocol::{HistoryPacket, Opcode, SyncPacket};
use crate::session::SyncSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Outcome of one handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandshakeReport {
    pub sent: Vec<Opcode>,
    pub failed: Vec<Opcode>,
}

impl HandshakeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Library {
    /// Send the handshake burst, bounding history by the stored watermark
    /// for the session's peer.
    pub async fn handshake(&self, session: &dyn SyncSession) -> HandshakeReport {
        let watermark = match self.watermark(session.remote_id()).await {
            Ok(mark) => mark,
            Err(e) => {
                warn!(
                    "Failed to read history watermark for {}: {}; sending full history",
                    session.remote_id().short(),
                    e
                );
                None
            }
        };
        self.handshake_since(session, watermark).await
    }

    /// Send the handshake burst with an explicit history watermark.
    pub async fn handshake_since(
        &self,
        session: &dyn SyncSession,
        watermark: Option<DateTime<Utc>>,
    ) -> HandshakeReport {
        let peer = session.remote_id().clone();
        let mut report = HandshakeReport::default();
        debug!("Starting handshake with {}", peer.short());

        let subscriptions = self.subscriptions_packet().await.map(SyncPacket::Subscriptions);
        send_step(session, Opcode::SyncSubscriptions, subscriptions, &mut report).await;

        let groups = self.groups_packet().await.map(SyncPacket::SubscriptionGroups);
        send_step(session, Opcode::SyncSubscriptionGroups, groups, &mut report).await;

        let playlists = self.playlists_packet().await.map(SyncPacket::Playlists);
        send_step(session, Opcode::SyncPlaylists, playlists, &mut report).await;

        let watch_later = self.watch_later_packet().await.map(SyncPacket::WatchLater);
        send_step(session, Opcode::SyncWatchLater, watch_later, &mut report).await;
        self.events.emit(SyncEvent::WatchLaterBroadcast { peer: peer.clone() });

        match self.history_since(watermark).await {
            Ok(entries) if entries.is_empty() => {
                debug!("No history newer than watermark for {}", peer.short());
            }
            history => {
                let packet = history.map(|entries| SyncPacket::History(HistoryPacket(entries)));
                send_step(session, Opcode::SyncHistory, packet, &mut report).await;
            }
        }

        if report.is_complete() {
            info!("Handshake with {} complete ({} packets)", peer.short(), report.sent.len());
        } else {
            warn!(
                "Handshake with {} finished with {} failed sends",
                peer.short(),
                report.failed.len()
            );
        }
        self.events.emit(SyncEvent::HandshakeCompleted {
            peer,
            sent: report.sent.clone(),
            failed: report.failed.clone(),
        });
        report
    }
}

async fn send_step(
    session: &dyn SyncSession,
    opcode: Opcode,
    packet: Result<SyncPacket>,
    report: &mut HandshakeReport,
) {
    let packet = match packet {
        Ok(packet) => packet,
        Err(e) => {
            warn!("Failed to build {} snapshot: {}", opcode, e);
            report.failed.push(opcode);
            return;
        }
    };
    match session.send_packet(&packet).await {
        Ok(()) => report.sent.push(opcode),
        Err(e) => {
            warn!(
                "Failed to send {} to {}: {}",
                opcode,
                session.remote_id().short(),
                e
            );
            report.failed.push(opcode);
        }
    }
}
