//! Outgoing peer connections.
//!
//! Each configured peer URL gets a task that dials, runs the session until
//! it closes, and reconnects with exponential backoff.

use crate::server::SyncServer;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: None,
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Keep a session with `url` open, redialing after every disconnect.
pub fn spawn_dialer(server: Arc<SyncServer>, url: String, config: ReconnectConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        loop {
            info!("Dialing {}", url);
            match Arc::clone(&server).connect(&url).await {
                // A session that got going resets the backoff.
                Ok(()) => attempts = 0,
                Err(e) => warn!("Connection to {} failed: {}", url, e),
            }

            attempts += 1;
            if config.max_attempts.is_some_and(|max| attempts >= max) {
                warn!("Giving up on {} after {} attempts", url, attempts);
                return;
            }
            let delay = calculate_backoff(attempts, &config);
            info!("Reconnecting to {} in {:?}", url, delay);
            tokio::time::sleep(delay).await;
        }
    })
}
