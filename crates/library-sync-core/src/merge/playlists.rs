use super::MergeReport;
use crate::library::{Library, Result};
use crate::models::Playlist;
use crate::protocol::{Opcode, PlaylistsPacket};
use crate::store::Batch;
use crate::tombstone::{removal_applies, survives_tombstone};
use crate::PeerId;
use tracing::debug;

impl Library {
    /// Merge a peer's playlists snapshot.
    ///
    /// Playlists are last-writer-wins on `date_update`. The local
    /// `date_last_played` is device-private and survives replacement.
    pub async fn merge_playlists(
        &self,
        peer: &PeerId,
        packet: &PlaylistsPacket,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::new(Opcode::SyncPlaylists);

        {
            let store = self.playlists.lock().await;
            let mut batch = Batch::new(&**store);

            for incoming in &packet.playlists {
                if incoming.id.is_empty() {
                    report.skipped += 1;
                    continue;
                }
                match batch.get(&incoming.id).await? {
                    None => {
                        let tombstone = batch.tombstone(&incoming.id).await?;
                        if !survives_tombstone(incoming.date_creation, tombstone) {
                            debug!("Ignoring playlist {} removed at {:?}", incoming.id, tombstone);
                            report.skipped += 1;
                            continue;
                        }
                        batch.upsert(incoming.for_peer());
                        report.added += 1;
                    }
                    Some(local) if local.date_update < incoming.date_update => {
                        batch.upsert(Playlist {
                            date_last_played: local.date_last_played,
                            ..incoming.clone()
                        });
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
                    if removal_applies(local.date_creation, removed_at) {
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

#[cfg(test)]
mod tests {
    use crate::library::test_support::{library_at, t};
    use crate::models::{Playlist, VideoRef};
    use crate::protocol::PlaylistsPacket;
    use crate::PeerId;

    fn playlist(id: &str, name: &str, created: i64, updated: i64) -> Playlist {
        let mut p = Playlist::new(name, t(created));
        p.id = id.to_string();
        p.date_update = t(updated);
        p
    }

    fn packet(playlists: Vec<Playlist>, removals: &[(&str, i64)]) -> PlaylistsPacket {
        PlaylistsPacket {
            playlists,
            playlist_removals: removals.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    async fn stored(library: &crate::Library, id: &str) -> Option<Playlist> {
        library.playlists.lock().await.get(id).await.unwrap()
    }

    #[tokio::test]
    async fn test_newer_replaces_and_keeps_last_played() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        let mut local = playlist("p", "Mix", 10, 10);
        local.date_last_played = Some(t(15));
        library.playlists.lock().await.upsert(local).await.unwrap();

        let mut incoming = playlist("p", "Mix v2", 10, 20);
        incoming.videos.push(VideoRef::new("v", "V"));
        let report = library
            .merge_playlists(&peer, &packet(vec![incoming], &[]))
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let merged = stored(&library, "p").await.unwrap();
        assert_eq!(merged.name, "Mix v2");
        assert_eq!(merged.videos.len(), 1);
        assert_eq!(merged.date_last_played, Some(t(15)));
    }

    #[tokio::test]
    async fn test_older_update_does_not_regress() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        library
            .merge_playlists(&peer, &packet(vec![playlist("p", "New", 10, 30)], &[]))
            .await
            .unwrap();
        library
            .merge_playlists(&peer, &packet(vec![playlist("p", "Old", 10, 25)], &[]))
            .await
            .unwrap();
        assert_eq!(stored(&library, "p").await.unwrap().name, "New");
    }

    #[tokio::test]
    async fn test_removal_respects_creation_time() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        library
            .merge_playlists(
                &peer,
                &packet(vec![playlist("a", "A", 10, 10), playlist("b", "B", 60, 60)], &[]),
            )
            .await
            .unwrap();

        let report = library
            .merge_playlists(&peer, &packet(vec![], &[("a", 50), ("b", 50), ("c", 50)]))
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.tombstones, 3);
        assert!(stored(&library, "a").await.is_none());
        assert!(stored(&library, "b").await.is_some());
    }

    #[tokio::test]
    async fn test_stale_copy_of_removed_playlist_is_rejected() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        library
            .merge_playlists(&peer, &packet(vec![], &[("p", 50)]))
            .await
            .unwrap();
        let report = library
            .merge_playlists(&peer, &packet(vec![playlist("p", "Stale", 10, 70)], &[]))
            .await
            .unwrap();
        assert_eq!(report.skipped, 1);
        assert!(stored(&library, "p").await.is_none());
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let (library, _) = library_at(0);
        let peer = PeerId::generate();
        let p = packet(vec![playlist("p", "Mix", 10, 10)], &[("q", 3)]);

        assert!(library.merge_playlists(&peer, &p).await.unwrap().has_changes());
        let before = library.playlists_packet().await.unwrap();
        assert!(!library.merge_playlists(&peer, &p).await.unwrap().has_changes());
        assert_eq!(library.playlists_packet().await.unwrap(), before);
    }
}
