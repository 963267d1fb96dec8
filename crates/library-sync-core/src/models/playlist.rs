use super::{Keyed, VideoRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, ordered list of videos, keyed by playlist ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub videos: Vec<VideoRef>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date_creation: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub date_update: DateTime<Utc>,
    /// Device-private; never merged.
    #[serde(
        default,
        with = "chrono::serde::ts_seconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub date_last_played: Option<DateTime<Utc>>,
}

impl Playlist {
    /// Create an empty playlist with a fresh ID.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            videos: Vec::new(),
            date_creation: now,
            date_update: now,
            date_last_played: None,
        }
    }

    /// Copy suitable for sending to a peer.
    pub fn for_peer(&self) -> Self {
        Self {
            date_last_played: None,
            ..self.clone()
        }
    }
}

impl Keyed for Playlist {
    fn key(&self) -> &str {
        &self.id
    }
}
