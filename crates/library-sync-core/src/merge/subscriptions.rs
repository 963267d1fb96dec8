use super::MergeReport;
use crate::events::{Notification, SyncEvent};
use crate::library::{Library, Result};
use crate::protocol::{Opcode, SubscriptionsPacket};
use crate::store::Batch;
use crate::tombstone::{removal_applies, survives_tombstone};
use crate::PeerId;
use tracing::debug;

impl Library {
    /// Merge a peer's subscriptions snapshot.
    ///
    /// An incoming subscription is accepted only if it is not already present
    /// and was created strictly after any tombstone for its URL. Incoming
    /// removals always reach the ledger but only delete a local subscription
    /// created before the removal.
    pub async fn merge_subscriptions(
        &self,
        peer: &PeerId,
        packet: &SubscriptionsPacket,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::new(Opcode::SyncSubscriptions);
        let mut added = Vec::new();
        let mut removed = Vec::new();

        {
            let store = self.subscriptions.lock().await;
            let mut batch = Batch::new(&**store);

            for incoming in &packet.subscriptions {
                let url = incoming.url();
                if url.is_empty() || batch.get(url).await?.is_some() {
                    report.skipped += 1;
                    continue;
                }
                let tombstone = batch.tombstone(url).await?;
                if !survives_tombstone(incoming.creation_time, tombstone) {
                    debug!("Ignoring subscription {} removed at {:?}", url, tombstone);
                    report.skipped += 1;
                    continue;
                }
                batch.upsert(incoming.for_peer());
                added.push(incoming.channel.name.clone());
                report.added += 1;
            }

            for (url, removed_at) in packet.removals() {
                if batch.set_tombstone(url, removed_at).await? {
                    report.tombstones += 1;
                }
                let Some(local) = batch.get(url).await? else {
                    continue;
                };
                if removal_applies(local.creation_time, removed_at) {
                    batch.delete(url);
                    removed.push(local.channel.name);
                    report.removed += 1;
                }
            }

            batch.commit().await?;
        }

        if let Some(notification) = Notification::summarize(added) {
            self.events.emit(SyncEvent::SubscriptionsAdded {
                peer: peer.clone(),
                notification,
            });
        }
        if let Some(notification) = Notification::summarize(removed) {
            self.events.emit(SyncEvent::SubscriptionsRemoved {
                peer: peer.clone(),
                notification,
            });
        }
        self.publish_merge(peer, &report);
        Ok(report)
    }
}
