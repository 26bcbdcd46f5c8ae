//! TOML file configuration structures.
//!
//! These structs directly map to the `chainbell.toml` file format. Every
//! section except `[[chains]]` may be omitted.

use serde::Deserialize;
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub telegram: TelegramSection,
    #[serde(default)]
    pub chains: Vec<ChainSection>,
    #[serde(default)]
    pub ingest: IngestSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub explorer: ExplorerSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// The address and port to listen on (e.g., "0.0.0.0:9090").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
    /// Bearer token of the admin API. `CHAINBELL_ADMIN_TOKEN` overrides it.
    /// Without a token the admin API rejects every request.
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
            admin_token: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9090))
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for TelegramSection {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_api_base() -> String {
    chainbell_sdk::client::DEFAULT_API_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainSection {
    pub chain_id: String,
    pub ws_url: String,
    #[serde(default = "default_subscribe_method")]
    pub subscribe_method: String,
    #[serde(default)]
    pub checkpoint_method: Option<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub start_height: u64,
}

fn default_subscribe_method() -> String {
    "suix_subscribeEvent".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestSection {
    #[serde(default = "default_ingest_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_ingest_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for IngestSection {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_ingest_backoff_base_ms(),
            backoff_max_ms: default_ingest_backoff_max_ms(),
        }
    }
}

fn default_ingest_backoff_base_ms() -> u64 {
    500
}

fn default_ingest_backoff_max_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
    /// Capacity of the dispatch queue. Only read at startup.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_limit: default_batch_limit(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_batch_limit() -> usize {
    200
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeliverySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delivery_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_delivery_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_lane_idle_secs")]
    pub lane_idle_secs: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_delivery_backoff_base_ms(),
            backoff_max_ms: default_delivery_backoff_max_ms(),
            max_concurrent: default_max_concurrent(),
            lane_idle_secs: default_lane_idle_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delivery_backoff_base_ms() -> u64 {
    1_000
}

fn default_delivery_backoff_max_ms() -> u64 {
    60_000
}

fn default_max_concurrent() -> usize {
    16
}

fn default_lane_idle_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerSection {
    #[serde(default = "default_explorer_base")]
    pub base_url: String,
}

impl Default for ExplorerSection {
    fn default() -> Self {
        Self {
            base_url: default_explorer_base(),
        }
    }
}

fn default_explorer_base() -> String {
    chainbell_core::rendering::DEFAULT_EXPLORER_BASE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"
admin_token = "hunter2"

[telegram]
api_base = "http://localhost:8081"
request_timeout_secs = 10

[[chains]]
chain_id = "sui-mainnet"
ws_url = "wss://fullnode.mainnet.sui.io"
packages = ["0x7b88"]
start_height = 1200

[dispatch]
poll_interval_ms = 250
queue_capacity = 32

[delivery]
max_attempts = 3
lane_idle_secs = 5

[explorer]
base_url = "https://suiscan.xyz/mainnet"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.server.admin_token.as_deref(), Some("hunter2"));
        assert_eq!(config.telegram.request_timeout_secs, 10);
        assert_eq!(config.chains.len(), 1);
        assert_eq!(config.chains[0].subscribe_method, "suix_subscribeEvent");
        assert_eq!(config.chains[0].checkpoint_method, None);
        assert_eq!(config.chains[0].start_height, 1200);
        assert_eq!(config.dispatch.poll_interval_ms, 250);
        assert_eq!(config.dispatch.batch_limit, 200);
        assert_eq!(config.dispatch.queue_capacity, 32);
        assert_eq!(config.delivery.max_attempts, 3);
        assert_eq!(config.delivery.max_concurrent, 16);
        assert_eq!(config.explorer.base_url, "https://suiscan.xyz/mainnet");
    }

    #[test]
    fn test_sections_default_when_missing() {
        let toml_str = r#"
[[chains]]
chain_id = "sui"
ws_url = "ws://localhost:9000"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert_eq!(config.server.admin_token, None);
        assert_eq!(config.telegram.api_base, "https://api.telegram.org");
        assert_eq!(config.ingest.backoff_base_ms, 500);
        assert_eq!(config.ingest.backoff_max_ms, 30_000);
        assert_eq!(config.delivery.backoff_max_ms, 60_000);
        assert_eq!(config.delivery.lane_idle_secs, 60);
        assert_eq!(config.explorer.base_url, "https://suivision.xyz");
    }
}
