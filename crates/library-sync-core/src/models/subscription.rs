use super::{Channel, Keyed};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kinds of content to fetch for a subscribed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchFlags {
    pub live: bool,
    pub streams: bool,
    pub videos: bool,
    pub posts: bool,
}

impl Default for FetchFlags {
    fn default() -> Self {
        Self {
            live: true,
            streams: true,
            videos: true,
            posts: true,
        }
    }
}

/// Usage statistics owned by this device. Never merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStats {
    pub play_count: u64,
    pub watch_seconds: u64,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_viewed: Option<DateTime<Utc>>,
}

impl SubscriptionStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A channel subscription, keyed by channel URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub channel: Channel,
    #[serde(default)]
    pub fetch: FetchFlags,
    /// First-subscribed time. Compared against tombstones.
    #[serde(with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "SubscriptionStats::is_empty")]
    pub stats: SubscriptionStats,
}

impl Subscription {
    pub fn new(channel: Channel, creation_time: DateTime<Utc>) -> Self {
        Self {
            channel,
            fetch: FetchFlags::default(),
            creation_time,
            stats: SubscriptionStats::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.channel.url
    }

    /// Copy suitable for sending to a peer (device-private stats removed).
    pub fn for_peer(&self) -> Self {
        Self {
            stats: SubscriptionStats::default(),
            ..self.clone()
        }
    }
}

impl Keyed for Subscription {
    fn key(&self) -> &str {
        &self.channel.url
    }
}
