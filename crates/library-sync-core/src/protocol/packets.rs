//! Packet payloads, one per sub-channel.
//!
//! Decoding is lenient at the entry level: a malformed item inside a list, or
//! a removal map value that isn't an integer, is dropped with a warning and
//! the rest of the packet still applies. Absent or `null` lists and maps read
//! as empty.

use super::Opcode;
use crate::models::{HistoryEntry, Playlist, Subscription, SubscriptionGroup, VideoRef};
use crate::time::{self, UNDEFINED_TIME};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;
    use std::collections::HashMap;
    use tracing::warn;

    pub fn vec<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let raw: Option<Vec<Value>> = Option::deserialize(d)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("Skipping malformed entry: {}", e);
                    None
                }
            })
            .collect())
    }

    pub fn times<'de, D>(d: D) -> Result<HashMap<String, i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<HashMap<String, Value>> = Option::deserialize(d)?;
        Ok(raw
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(key, value)| match value.as_i64() {
                Some(secs) if !key.is_empty() => Some((key, secs)),
                _ => {
                    warn!("Skipping malformed time entry for {:?}: {}", key, value);
                    None
                }
            })
            .collect())
    }
}

/// Typed view of a wire time map. Undefined (negative) times are dropped.
fn typed_times(map: &HashMap<String, i64>) -> Vec<(&str, DateTime<Utc>)> {
    map.iter()
        .filter_map(|(key, secs)| time::from_unix(*secs).map(|t| (key.as_str(), t)))
        .collect()
}

fn wire_times<'a>(
    entries: impl IntoIterator<Item = (&'a str, DateTime<Utc>)>,
) -> HashMap<String, i64> {
    entries
        .into_iter()
        .map(|(k, t)| (k.to_string(), t.timestamp()))
        .collect()
}

/// `{ subscriptions: [...], subscriptionRemovals: { url: unixTime } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionsPacket {
    #[serde(default, deserialize_with = "lenient::vec")]
    pub subscriptions: Vec<Subscription>,
    #[serde(default, deserialize_with = "lenient::times")]
    pub subscription_removals: HashMap<String, i64>,
}

impl SubscriptionsPacket {
    pub fn removals(&self) -> Vec<(&str, DateTime<Utc>)> {
        typed_times(&self.subscription_removals)
    }
}

/// `{ groups: [...], groupRemovals: { id: unixTime } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionGroupsPacket {
    #[serde(default, deserialize_with = "lenient::vec")]
    pub groups: Vec<SubscriptionGroup>,
    #[serde(default, deserialize_with = "lenient::times")]
    pub group_removals: HashMap<String, i64>,
}

impl SubscriptionGroupsPacket {
    pub fn removals(&self) -> Vec<(&str, DateTime<Utc>)> {
        typed_times(&self.group_removals)
    }
}

/// `{ playlists: [...], playlistRemovals: { id: unixTime } }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistsPacket {
    #[serde(default, deserialize_with = "lenient::vec")]
    pub playlists: Vec<Playlist>,
    #[serde(default, deserialize_with = "lenient::times")]
    pub playlist_removals: HashMap<String, i64>,
}

impl PlaylistsPacket {
    pub fn removals(&self) -> Vec<(&str, DateTime<Utc>)> {
        typed_times(&self.playlist_removals)
    }
}

/// `{ videos, videoAdds, videoRemovals, reorderTime, ordering }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchLaterPacket {
    #[serde(default, deserialize_with = "lenient::vec")]
    pub videos: Vec<VideoRef>,
    #[serde(default, deserialize_with = "lenient::times")]
    pub video_adds: HashMap<String, i64>,
    #[serde(default, deserialize_with = "lenient::times")]
    pub video_removals: HashMap<String, i64>,
    #[serde(default = "undefined_time")]
    pub reorder_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordering: Option<Vec<String>>,
}

fn undefined_time() -> i64 {
    UNDEFINED_TIME
}

impl Default for WatchLaterPacket {
    fn default() -> Self {
        Self {
            videos: Vec::new(),
            video_adds: HashMap::new(),
            video_removals: HashMap::new(),
            reorder_time: UNDEFINED_TIME,
            ordering: None,
        }
    }
}

impl WatchLaterPacket {
    /// Reported add-time for a URL. Absent or undefined reads as `None`.
    pub fn add_time(&self, url: &str) -> Option<DateTime<Utc>> {
        self.video_adds.get(url).and_then(|s| time::from_unix(*s))
    }

    pub fn removals(&self) -> Vec<(&str, DateTime<Utc>)> {
        typed_times(&self.video_removals)
    }

    /// Reorder time, with undefined (negative) values as `None`.
    pub fn reorder_time(&self) -> Option<DateTime<Utc>> {
        time::from_unix(self.reorder_time)
    }

    /// Build the wire form of a local watch-later state.
    pub fn from_state(state: &crate::models::WatchLater) -> Self {
        Self {
            videos: state.ordered().into_iter().cloned().collect(),
            video_adds: wire_times(state.added.iter().map(|(k, v)| (k.as_str(), *v))),
            video_removals: wire_times(state.removed.iter().map(|(k, v)| (k.as_str(), *v))),
            reorder_time: time::to_unix_or_undefined(state.reorder_time),
            ordering: Some(state.order.clone()),
        }
    }
}

/// `[ { video, position, date } ... ]`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HistoryPacket(pub Vec<HistoryEntry>);

impl<'de> Deserialize<'de> for HistoryPacket {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        lenient::vec(d).map(HistoryPacket)
    }
}

/// `{ url, position }`: open a video on the receiving device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendToDevicePacket {
    pub url: String,
    #[serde(default, rename = "position")]
    pub position_secs: u64,
}

/// Any packet, tagged by its sub-channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncPacket {
    Subscriptions(SubscriptionsPacket),
    SubscriptionGroups(SubscriptionGroupsPacket),
    Playlists(PlaylistsPacket),
    WatchLater(WatchLaterPacket),
    History(HistoryPacket),
    SendToDevice(SendToDevicePacket),
}

impl SyncPacket {
    pub fn opcode(&self) -> Opcode {
        match self {
            SyncPacket::Subscriptions(_) => Opcode::SyncSubscriptions,
            SyncPacket::SubscriptionGroups(_) => Opcode::SyncSubscriptionGroups,
            SyncPacket::Playlists(_) => Opcode::SyncPlaylists,
            SyncPacket::WatchLater(_) => Opcode::SyncWatchLater,
            SyncPacket::History(_) => Opcode::SyncHistory,
            SyncPacket::SendToDevice(_) => Opcode::SendToDevice,
        }
    }
}
