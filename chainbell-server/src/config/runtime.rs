//! Validated runtime configuration, built from the file and the environment.

use super::ConfigError;
use super::file::{ChainSection, FileConfig};
use chainbell_core::config::{ChainConfig, DeliveryConfig, DispatchConfig, IngestConfig};
use chainbell_core::utils::Backoff;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

pub const ADMIN_TOKEN_ENV: &str = "CHAINBELL_ADMIN_TOKEN";
pub const BOT_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub admin_token: Option<String>,
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub api_base: Url,
    pub bot_token: String,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_base", &self.api_base.as_str())
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub telegram: TelegramConfig,
    pub chains: Vec<ChainConfig>,
    pub ingest: IngestConfig,
    pub dispatch: DispatchConfig,
    pub queue_capacity: usize,
    pub delivery: DeliveryConfig,
    pub explorer_base: String,
}

impl RuntimeConfig {
    /// Build the runtime configuration from the file, reading secrets
    /// through `env`.
    pub fn from_file(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let admin_token = env(ADMIN_TOKEN_ENV)
            .or(file.server.admin_token)
            .filter(|t| !t.is_empty());
        let bot_token = env(BOT_TOKEN_ENV)
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingEnv(BOT_TOKEN_ENV))?;
        let api_base = Url::parse(&file.telegram.api_base).map_err(|e| {
            ConfigError::ValidationError(format!(
                "telegram.api_base {:?}: {e}",
                file.telegram.api_base
            ))
        })?;

        let chains = validate_chains(file.chains)?;

        let ingest = IngestConfig {
            backoff: backoff(
                "ingest",
                file.ingest.backoff_base_ms,
                file.ingest.backoff_max_ms,
            )?,
        };

        positive("dispatch.poll_interval_ms", file.dispatch.poll_interval_ms)?;
        positive("dispatch.batch_limit", file.dispatch.batch_limit as u64)?;
        positive("dispatch.queue_capacity", file.dispatch.queue_capacity as u64)?;
        let dispatch = DispatchConfig {
            poll_interval: Duration::from_millis(file.dispatch.poll_interval_ms),
            batch_limit: file.dispatch.batch_limit,
        };

        positive("delivery.max_attempts", u64::from(file.delivery.max_attempts))?;
        positive("delivery.max_concurrent", file.delivery.max_concurrent as u64)?;
        positive("delivery.lane_idle_secs", file.delivery.lane_idle_secs)?;
        let delivery = DeliveryConfig {
            max_attempts: file.delivery.max_attempts,
            backoff: backoff(
                "delivery",
                file.delivery.backoff_base_ms,
                file.delivery.backoff_max_ms,
            )?,
            max_concurrent: file.delivery.max_concurrent,
            lane_idle: Duration::from_secs(file.delivery.lane_idle_secs),
        };

        Ok(Self {
            server: ServerConfig {
                listen: file.server.listen,
                admin_token,
            },
            telegram: TelegramConfig {
                api_base,
                bot_token,
                request_timeout: Duration::from_secs(file.telegram.request_timeout_secs),
            },
            chains,
            ingest,
            dispatch,
            queue_capacity: file.dispatch.queue_capacity,
            delivery,
            explorer_base: file.explorer.base_url,
        })
    }
}

fn validate_chains(sections: Vec<ChainSection>) -> Result<Vec<ChainConfig>, ConfigError> {
    if sections.is_empty() {
        return Err(ConfigError::ValidationError(
            "at least one [[chains]] entry is required".to_string(),
        ));
    }
    let mut seen = HashSet::new();
    sections
        .into_iter()
        .map(|chain| {
            if chain.chain_id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "chain_id must not be empty".to_string(),
                ));
            }
            if !seen.insert(chain.chain_id.clone()) {
                return Err(ConfigError::ValidationError(format!(
                    "chain {} is configured twice",
                    chain.chain_id
                )));
            }
            Url::parse(&chain.ws_url).map_err(|e| {
                ConfigError::ValidationError(format!(
                    "chain {} ws_url {:?}: {e}",
                    chain.chain_id, chain.ws_url
                ))
            })?;
            Ok(ChainConfig {
                chain_id: chain.chain_id,
                ws_url: chain.ws_url,
                subscribe_method: chain.subscribe_method,
                checkpoint_method: chain.checkpoint_method,
                packages: chain.packages,
                start_height: chain.start_height,
            })
        })
        .collect()
}

fn positive(name: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{name} must be greater than zero"
        )));
    }
    Ok(())
}

fn backoff(section: &str, base_ms: u64, max_ms: u64) -> Result<Backoff, ConfigError> {
    positive(&format!("{section}.backoff_base_ms"), base_ms)?;
    if max_ms < base_ms {
        return Err(ConfigError::ValidationError(format!(
            "{section}.backoff_max_ms must not be below backoff_base_ms"
        )));
    }
    Ok(Backoff::from_millis(base_ms, max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn file(toml_str: &str) -> FileConfig {
        toml::from_str(toml_str).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    const ONE_CHAIN: &str = r#"
[server]
admin_token = "from-file"

[[chains]]
chain_id = "sui"
ws_url = "wss://fullnode.mainnet.sui.io"
checkpoint_method = "suix_subscribeCheckpoint"
"#;

    #[test]
    fn test_builds_runtime_config() {
        let config =
            RuntimeConfig::from_file(file(ONE_CHAIN), env(&[(BOT_TOKEN_ENV, "123:abc")])).unwrap();
        assert_eq!(config.server.admin_token.as_deref(), Some("from-file"));
        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.api_base.as_str(), "https://api.telegram.org/");
        assert_eq!(config.chains[0].chain_id, "sui");
        assert_eq!(
            config.chains[0].checkpoint_method.as_deref(),
            Some("suix_subscribeCheckpoint")
        );
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.delivery, DeliveryConfig::default());
        assert_eq!(config.ingest, IngestConfig::default());
        assert_eq!(config.queue_capacity, 256);
    }

    #[test]
    fn test_env_overrides_admin_token() {
        let config = RuntimeConfig::from_file(
            file(ONE_CHAIN),
            env(&[(BOT_TOKEN_ENV, "123:abc"), (ADMIN_TOKEN_ENV, "from-env")]),
        )
        .unwrap();
        assert_eq!(config.server.admin_token.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_bot_token_is_required() {
        let err = RuntimeConfig::from_file(file(ONE_CHAIN), env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(BOT_TOKEN_ENV)));
    }

    #[test]
    fn test_rejects_invalid_sections() {
        let cases = [
            "",
            r#"
[[chains]]
chain_id = "sui"
ws_url = "not a url"
"#,
            r#"
[[chains]]
chain_id = "sui"
ws_url = "ws://a"
[[chains]]
chain_id = "sui"
ws_url = "ws://b"
"#,
            r#"
[[chains]]
chain_id = "sui"
ws_url = "ws://a"
[delivery]
max_attempts = 0
"#,
            r#"
[[chains]]
chain_id = "sui"
ws_url = "ws://a"
[ingest]
backoff_base_ms = 1000
backoff_max_ms = 10
"#,
        ];
        for case in cases {
            let err = RuntimeConfig::from_file(file(case), env(&[(BOT_TOKEN_ENV, "t")]))
                .unwrap_err();
            assert!(
                matches!(err, ConfigError::ValidationError(_)),
                "{case:?} gave {err}"
            );
        }
    }
}
