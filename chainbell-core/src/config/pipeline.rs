use crate::utils::Backoff;
use std::time::Duration;

/// One chain to ingest from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain_id: String,
    pub ws_url: String,
    /// JSON-RPC method of the event subscription.
    pub subscribe_method: String,
    /// JSON-RPC method of the checkpoint subscription, if the node has one.
    pub checkpoint_method: Option<String>,
    /// Move packages to watch. Empty means all.
    pub packages: Vec<String>,
    /// First height to read when the chain has no cursor yet.
    pub start_height: u64,
}

/// Reconnect policy of the chain event sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub backoff: Backoff,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            backoff: Backoff::from_millis(500, 30_000),
        }
    }
}

/// Dispatcher settings. Reloadable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub poll_interval: Duration,
    /// Most events matched and pairs dispatched per tick.
    pub batch_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1_000),
            batch_limit: 200,
        }
    }
}

/// Notification sender settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Total transport calls per pair before giving up.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Deliveries in flight across all recipients.
    pub max_concurrent: usize,
    /// A recipient lane with no work for this long is shut down.
    pub lane_idle: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::from_millis(1_000, 60_000),
            max_concurrent: 16,
            lane_idle: Duration::from_secs(60),
        }
    }
}
