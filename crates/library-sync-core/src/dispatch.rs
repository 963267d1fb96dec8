//! Route inbound packets to their merge handler.

use crate::events::SyncEvent;
use crate::library::{Library, Result};
use crate::merge::MergeReport;
use crate::protocol::{self, SyncPacket};
use crate::session::SyncSession;
use tracing::{debug, info};

/// What handling one inbound frame produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub packet: SyncPacket,
    /// `None` for packets that carry no collection state.
    pub report: Option<MergeReport>,
}

impl Dispatched {
    pub fn has_changes(&self) -> bool {
        self.report.as_ref().is_some_and(MergeReport::has_changes)
    }
}

impl Library {
    /// Apply a decoded packet received from `session`.
    pub async fn dispatch(
        &self,
        session: &dyn SyncSession,
        packet: &SyncPacket,
    ) -> Result<Option<MergeReport>> {
        let peer = session.remote_id();
        debug!("Received {} from {}", packet.opcode(), peer.short());

        let report = match packet {
            SyncPacket::Subscriptions(p) => self.merge_subscriptions(peer, p).await?,
            SyncPacket::SubscriptionGroups(p) => self.merge_groups(peer, p).await?,
            SyncPacket::Playlists(p) => self.merge_playlists(peer, p).await?,
            SyncPacket::WatchLater(p) => self.merge_watch_later(peer, p).await?,
            SyncPacket::History(p) => self.merge_history(peer, p).await?,
            SyncPacket::SendToDevice(p) => {
                info!("{} sent {} to this device", peer.short(), p.url);
                self.events.emit(SyncEvent::SendToDevice {
                    peer: peer.clone(),
                    url: p.url.clone(),
                    position_secs: p.position_secs,
                });
                return Ok(None);
            }
        };
        Ok(Some(report))
    }

    /// Decode a complete `[opcode][flags][body]` frame and apply it.
    pub async fn dispatch_frame(&self, session: &dyn SyncSession, frame: &[u8]) -> Result<Dispatched> {
        let packet = protocol::decode(frame)?;
        let report = self.dispatch(session, &packet).await?;
        Ok(Dispatched { packet, report })
    }
}
