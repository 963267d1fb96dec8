use super::{Keyed, VideoRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Watch progress for one video, keyed by the video URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub video: VideoRef,
    /// Playback position in seconds.
    #[serde(rename = "position")]
    pub position_secs: u64,
    /// Last-watched time.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(video: VideoRef, position_secs: u64, date: DateTime<Utc>) -> Self {
        Self {
            video,
            position_secs,
            date,
        }
    }
}

impl Keyed for HistoryEntry {
    fn key(&self) -> &str {
        &self.video.url
    }
}
