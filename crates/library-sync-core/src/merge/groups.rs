use super::MergeReport;
use crate::library::{Library, Result};
use crate::protocol::{Opcode, SubscriptionGroupsPacket};
use crate::store::Batch;
use crate::tombstone::{removal_applies, survives_tombstone};
use crate::PeerId;
use tracing::debug;

impl Library {
    /// Merge a peer's subscription groups snapshot.
    ///
    /// Groups are last-writer-wins on `last_change`. Accepted groups are
    /// stored as-is and not re-broadcast.
    pub async fn merge_groups(
        &self,
        peer: &PeerId,
        packet: &SubscriptionGroupsPacket,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::new(Opcode::SyncSubscriptionGroups);

        {
            let store = self.groups.lock().await;
            let mut batch = Batch::new(&**store);

            for incoming in &packet.groups {
                if incoming.id.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                match batch.get(&incoming.id).await? {
                    None => {
                        let tombstone = batch.tombstone(&incoming.id).await?;
                        if !survives_tombstone(incoming.creation_time, tombstone) {
                            debug!("Ignoring group {} removed at {:?}", incoming.id, tombstone);
                            report.skipped += 1;
                            continue;
                        }
                        batch.upsert(incoming.clone());
                        report.added += 1;
                    }
                    Some(local) if incoming.last_change > local.last_change => {
                        batch.upsert(incoming.clone());
                        report.updated += 1;
                    }
                    Some(_) => report.skipped += 1,
                }
            }

            for (id, removed_at) in packet.removals() {
                if batch.set_tombstone(id, removed_at).await? {
                    report.tombstones += 1;
                }
                if let Some(local) = batch.get(id).await? {
                    if removal_applies(local.creation_time, removed_at) {
                        batch.delete(id);
                        report.removed += 1;
                    }
                }
            }

            batch.commit().await?;
        }

        self.publish_merge(peer, &report);
        Ok(report)
    }
}
