//! Merge handlers: apply one inbound packet to the local library.
//!
//! Every handler follows the same shape:
//!
//! 1. Take the collection lock
//! 2. Compare each incoming item against the local copy and the tombstone
//!    ledger, staging accepted changes
//! 3. Commit all staged changes in one store call
//! 4. Release the lock, then publish events
//!
//! A store failure in step 3 aborts the whole packet; nothing is applied and
//! no events are published. Handlers never emit packets back to the sender.

mod groups;
mod history;
mod playlists;
mod subscriptions;
mod watch_later;

use crate::events::SyncEvent;
use crate::library::Library;
use crate::protocol::Opcode;
use crate::PeerId;
use serde::Serialize;
use tracing::debug;

/// What one inbound packet changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    pub opcode: Opcode,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Tombstones newly recorded or moved later.
    pub tombstones: usize,
    /// Incoming items ignored as stale, duplicate, or suppressed.
    pub skipped: usize,
}

impl MergeReport {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            added: 0,
            updated: 0,
            removed: 0,
            tombstones: 0,
            skipped: 0,
        }
    }

    /// Whether local state changed.
    pub fn has_changes(&self) -> bool {
        self.added + self.updated + self.removed + self.tombstones > 0
    }
}

impl Library {
    pub(crate) fn publish_merge(&self, peer: &PeerId, report: &MergeReport) {
        if !report.has_changes() {
            debug!("{} from {}: no changes", report.opcode, peer.short());
            return;
        }
        debug!(
            "{} from {}: +{} ~{} -{} tombstones={} skipped={}",
            report.opcode,
            peer.short(),
            report.added,
            report.updated,
            report.removed,
            report.tombstones,
            report.skipped
        );
        self.events.emit(SyncEvent::CollectionMerged {
            peer: peer.clone(),
            report: report.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_changes() {
        let mut report = MergeReport::new(Opcode::SyncPlaylists);
        report.skipped = 4;
        assert!(!report.has_changes());
        report.tombstones = 1;
        assert!(report.has_changes());
    }

    #[test]
    fn test_report_serialization() {
        let report = MergeReport::new(Opcode::SyncHistory);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"opcode\":\"syncHistory\""));
    }
}
