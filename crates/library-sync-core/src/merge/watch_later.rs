use super::MergeReport;
use crate::library::{Library, Result};
use crate::protocol::{Opcode, WatchLaterPacket};
use crate::time::{is_after_placeholder_cutoff, EARLIEST};
use crate::tombstone::survives_tombstone;
use crate::PeerId;
use tracing::debug;

impl Library {
    /// Merge a peer's watch-later state.
    ///
    /// Membership merges per item against the add and removal maps. The
    /// ordering is one versioned value: a strictly newer reorder time replaces
    /// it wholesale, together with that time, in the same save.
    pub async fn merge_watch_later(
        &self,
        peer: &PeerId,
        packet: &WatchLaterPacket,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::new(Opcode::SyncWatchLater);

        {
            let store = self.watch_later.lock().await;
            let original = store.load().await?;
            let mut state = original.clone();

            for video in &packet.videos {
                let url = video.url.as_str();
                if url.is_empty() || state.contains(url) {
                    report.skipped += 1;
                    continue;
                }
                let added_at = packet.add_time(url).unwrap_or(EARLIEST);
                if !survives_tombstone(added_at, state.removed.get(url).copied()) {
                    debug!("Ignoring watch-later add for {} (removed later)", url);
                    report.skipped += 1;
                    continue;
                }
                state.insert(video.clone());
                if is_after_placeholder_cutoff(added_at) {
                    state.added.insert(url.to_string(), added_at);
                }
                report.added += 1;
            }

            for (url, removed_at) in packet.removals() {
                if state.contains(url) {
                    if state.add_time(url) < removed_at {
                        state.remove(url);
                        state.record_removal(url, removed_at);
                        report.removed += 1;
                    }
                } else if state.record_removal(url, removed_at) {
                    report.tombstones += 1;
                }
            }

            if let (Some(reordered_at), Some(ordering)) = (packet.reorder_time(), &packet.ordering) {
                if state.reorder_time.is_none_or(|local| reordered_at > local) {
                    state.order = ordering.clone();
                    state.reorder_time = Some(reordered_at);
                    report.updated += 1;
                }
            }

            if state != original {
                store.save(&state).await?;
            }
        }

        self.publish_merge(peer, &report);
        Ok(report)
    }
}
