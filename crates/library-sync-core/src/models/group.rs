use super::Keyed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-defined group of subscriptions, keyed by a device-independent ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionGroup {
    pub id: String,
    pub name: String,
    /// Channel URLs in display order.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_change: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub creation_time: DateTime<Utc>,
}

impl SubscriptionGroup {
    /// Create a new group with a fresh ID.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            urls: Vec::new(),
            image: None,
            priority: 0,
            last_change: now,
            creation_time: now,
        }
    }
}

impl Keyed for SubscriptionGroup {
    fn key(&self) -> &str {
        &self.id
    }
}
