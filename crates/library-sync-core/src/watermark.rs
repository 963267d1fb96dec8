//! Per-peer history watermarks.
//!
//! For each remote device we remember the latest history timestamp known to
//! have been exchanged with it. The handshake only pushes history newer than
//! that mark, and the history merge handler moves it forward.

use crate::peer_id::PeerId;
use crate::store::{Result, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Last history timestamp exchanged with `peer`, if any.
    async fn get(&self, peer: &PeerId) -> Result<Option<DateTime<Utc>>>;

    /// Persist a new watermark for `peer`.
    async fn set(&self, peer: &PeerId, at: DateTime<Utc>) -> Result<()>;
}

#[derive(Default)]
pub struct InMemoryWatermarks {
    marks: RwLock<HashMap<PeerId, DateTime<Utc>>>,
    fail_writes: AtomicBool,
}

impl InMemoryWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `set` fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl WatermarkStore for InMemoryWatermarks {
    async fn get(&self, peer: &PeerId) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .marks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(peer)
            .copied())
    }

    async fn set(&self, peer: &PeerId, at: DateTime<Utc>) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("watermark write rejected".into()));
        }
        self.marks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(peer.clone(), at);
        Ok(())
    }
}

/// Decide whether a received history batch moves the watermark.
///
/// The mark only moves forward, and only for batches of more than one entry:
/// a single entry is usually a live progress update still in flight, not the
/// tail of a completed exchange.
pub fn next_watermark(
    current: Option<DateTime<Utc>>,
    batch_max: Option<DateTime<Utc>>,
    batch_len: usize,
) -> Option<DateTime<Utc>> {
    let candidate = batch_max?;
    if batch_len <= 1 {
        return None;
    }
    match current {
        Some(existing) if existing >= candidate => None,
        _ => Some(candidate),
    }
}
