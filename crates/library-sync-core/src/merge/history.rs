use super::MergeReport;
use crate::events::SyncEvent;
use crate::library::{Library, Result};
use crate::protocol::{HistoryPacket, Opcode};
use crate::store::Batch;
use crate::watermark::next_watermark;
use crate::PeerId;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

impl Library {
    /// Merge a peer's history batch and advance its watermark.
    ///
    /// Each entry keeps whichever of the local and incoming copies was watched
    /// last, so arrival order inside or across batches does not matter.
    pub async fn merge_history(&self, peer: &PeerId, packet: &HistoryPacket) -> Result<MergeReport> {
        let mut report = MergeReport::new(Opcode::SyncHistory);
        let mut latest: Option<DateTime<Utc>> = None;

        {
            let store = self.history.lock().await;
            let mut batch = Batch::new(&**store);

            for entry in &packet.0 {
                let url = entry.video.url.as_str();
                if url.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                latest = latest.max(Some(entry.date));

                match batch.get(url).await? {
                    None => {
                        batch.upsert(entry.clone());
                        report.added += 1;
                    }
                    Some(local) if entry.date > local.date => {
                        batch.upsert(entry.clone());
                        report.updated += 1;
                    }
                    Some(_) => report.skipped += 1,
                }
            }

            batch.commit().await?;
        }

        // History is already committed, so a watermark failure is only logged
        let advanced = match self.advance_watermark(peer, latest, packet.0.len()).await {
            Ok(advanced) => advanced,
            Err(e) => {
                warn!("Failed to update history watermark for {}: {}", peer.short(), e);
                None
            }
        };
        if let Some(next) = advanced {
            debug!("History watermark for {} -> {}", peer.short(), next);
            self.events.emit(SyncEvent::WatermarkAdvanced {
                peer: peer.clone(),
                timestamp: next.timestamp(),
            });
        }

        self.publish_merge(peer, &report);
        Ok(report)
    }

    async fn advance_watermark(
        &self,
        peer: &PeerId,
        latest: Option<DateTime<Utc>>,
        batch_len: usize,
    ) -> Result<Option<DateTime<Utc>>> {
        let watermarks = self.watermarks.lock().await;
        let current = watermarks.get(peer).await?;
        let Some(next) = next_watermark(current, latest, batch_len) else {
            return Ok(None);
        };
        watermarks.set(peer, next).await?;
        Ok(Some(next))
    }
}

#[cfg(test)]
mod tests {
    use crate::events::SyncEvent;
    use crate::library::test_support::{library_at, t};
    use crate::models::{HistoryEntry, VideoRef};
    use crate::protocol::HistoryPacket;
    use crate::PeerId;
    use std::sync::{Arc, Mutex};

    fn entry(url: &str, position: u64, date: i64) -> HistoryEntry {
        HistoryEntry::new(VideoRef::new(url, url.to_uppercase()), position, t(date))
    }

    #[tokio::test]
    async fn test_latest_entry_wins_in_any_order() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        library
            .merge_history(&peer, &HistoryPacket(vec![entry("v", 90, 200), entry("v", 10, 100)]))
            .await
            .unwrap();

        let stored = library.history.lock().await.get("v").await.unwrap().unwrap();
        assert_eq!(stored.position_secs, 90);
        assert_eq!(stored.date, t(200));

        library
            .merge_history(&peer, &HistoryPacket(vec![entry("v", 30, 150)]))
            .await
            .unwrap();
        let stored = library.history.lock().await.get("v").await.unwrap().unwrap();
        assert_eq!(stored.position_secs, 90);
    }

    #[tokio::test]
    async fn test_watermark_advances_on_multi_entry_batches() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();

        library
            .merge_history(&peer, &HistoryPacket(vec![entry("a", 1, 100), entry("b", 1, 300)]))
            .await
            .unwrap();
        assert_eq!(library.watermark(&peer).await.unwrap(), Some(t(300)));

        // Older batch never moves it back
        library
            .merge_history(&peer, &HistoryPacket(vec![entry("c", 1, 50), entry("d", 1, 60)]))
            .await
            .unwrap();
        assert_eq!(library.watermark(&peer).await.unwrap(), Some(t(300)));
    }

    #[tokio::test]
    async fn test_single_entry_batch_keeps_watermark() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        library
            .merge_history(&peer, &HistoryPacket(vec![entry("a", 1, 500)]))
            .await
            .unwrap();

        assert!(library.history.lock().await.get("a").await.unwrap().is_some());
        assert_eq!(library.watermark(&peer).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watermarks_are_per_peer() {
        let (library, _) = library_at(0);
        let a = PeerId::generate();
        let b = PeerId::generate();
        library
            .merge_history(&a, &HistoryPacket(vec![entry("x", 1, 10), entry("y", 1, 20)]))
            .await
            .unwrap();
        assert_eq!(library.watermark(&a).await.unwrap(), Some(t(20)));
        assert_eq!(library.watermark(&b).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        let packet = HistoryPacket(vec![entry("a", 5, 10), entry("b", 6, 20)]);

        assert!(library.merge_history(&peer, &packet).await.unwrap().has_changes());
        let before = library.history_since(None).await.unwrap();
        let report = library.merge_history(&peer, &packet).await.unwrap();
        assert!(!report.has_changes());
        assert_eq!(library.history_since(None).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_watermark_event() {
        let (library, _) = library_at(0);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _listener = library.events().subscribe(move |event| {
            if let SyncEvent::WatermarkAdvanced { timestamp, .. } = event {
                sink.lock().unwrap().push(timestamp);
            }
        });

        library
            .merge_history(
                &PeerId::generate(),
                &HistoryPacket(vec![entry("a", 1, 10), entry("b", 1, 20)]),
            )
            .await
            .unwrap();
        assert_eq!(*events.lock().unwrap(), vec![20]);
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_watermark() {
        let (library, _) = library_at(0);
        let failing = crate::store::InMemoryCollection::<HistoryEntry>::new();
        failing.set_fail_commits(true);
        *library.history.lock().await = Box::new(failing);
        let peer = PeerId::generate();

        let result = library
            .merge_history(&peer, &HistoryPacket(vec![entry("a", 1, 10), entry("b", 1, 20)]))
            .await;
        assert!(result.is_err());
        assert_eq!(library.watermark(&peer).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_watermark_failure_keeps_committed_history() {
        let (library, _) = library_at(0);
        let failing = crate::watermark::InMemoryWatermarks::new();
        failing.set_fail_writes(true);
        *library.watermarks.lock().await = Box::new(failing);
        let peer = PeerId::generate();

        let report = library
            .merge_history(&peer, &HistoryPacket(vec![entry("a", 1, 10), entry("b", 1, 20)]))
            .await
            .unwrap();
        assert_eq!(report.added, 2);
        assert_eq!(library.history_since(None).await.unwrap().len(), 2);
        assert_eq!(library.watermark(&peer).await.unwrap(), None);
    }
}
