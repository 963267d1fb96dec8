use super::VideoRef;
use crate::time::EARLIEST;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The "watch later" queue.
///
/// Membership and ordering are tracked separately: `videos` holds the members
/// in the order they were added on this device, while `order` is the
/// user-arranged sequence of URLs. `order` only changes wholesale, versioned by
/// `reorder_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchLater {
    pub videos: Vec<VideoRef>,
    pub order: Vec<String>,
    /// URL -> time the video was first added.
    pub added: HashMap<String, DateTime<Utc>>,
    /// URL -> time the video was removed.
    pub removed: HashMap<String, DateTime<Utc>>,
    pub reorder_time: Option<DateTime<Utc>>,
}

impl WatchLater {
    pub fn contains(&self, url: &str) -> bool {
        self.videos.iter().any(|v| v.url == url)
    }

    /// Recorded add-time, or [`EARLIEST`] when none was recorded.
    pub fn add_time(&self, url: &str) -> DateTime<Utc> {
        self.added.get(url).copied().unwrap_or(EARLIEST)
    }

    /// Append a video. Returns false if it was already a member.
    pub fn insert(&mut self, video: VideoRef) -> bool {
        if self.contains(&video.url) {
            return false;
        }
        if !self.order.iter().any(|u| *u == video.url) {
            self.order.push(video.url.clone());
        }
        self.videos.push(video);
        true
    }

    /// Remove a video from membership and ordering.
    pub fn remove(&mut self, url: &str) -> Option<VideoRef> {
        let index = self.videos.iter().position(|v| v.url == url)?;
        self.order.retain(|u| u != url);
        Some(self.videos.remove(index))
    }

    /// Record a removal time, keeping the latest one seen for the URL.
    pub fn record_removal(&mut self, url: &str, at: DateTime<Utc>) -> bool {
        match self.removed.get(url) {
            Some(existing) if *existing >= at => false,
            _ => {
                self.removed.insert(url.to_string(), at);
                true
            }
        }
    }

    /// Members sorted by the user ordering. Members missing from `order`
    /// follow in insertion order.
    pub fn ordered(&self) -> Vec<&VideoRef> {
        let rank = |url: &str| {
            self.order
                .iter()
                .position(|u| u == url)
                .unwrap_or(usize::MAX)
        };
        let mut videos: Vec<&VideoRef> = self.videos.iter().collect();
        videos.sort_by_key(|v| rank(&v.url));
        videos
    }
}
