//! Wiring of the pipeline workers.
//!
//! One `ChainEventSource` per configured chain, one `Dispatcher` and one
//! `NotificationSender`, all stopped by the same shutdown channel.

use crate::config::RuntimeConfig;
use crate::config::runtime::TelegramConfig;
use chainbell_core::chain::SuiChainClient;
use chainbell_core::config::{ChainConfig, ConfigStore, DispatchConfig};
use chainbell_core::events::delivery_task_channel;
use chainbell_core::ledger::Ledger;
use chainbell_core::processors::{ChainEventSource, Dispatcher, NotificationSender};
use chainbell_core::registry::SubscriptionRegistry;
use chainbell_core::rendering::Renderer;
use chainbell_core::transport::{BotTransport, TelegramTransport};
use chainbell_sdk::client::{NodeStreamClient, TelegramClient};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Build the Telegram transport from its config section.
pub fn telegram_transport(config: &TelegramConfig) -> Result<TelegramTransport, reqwest::Error> {
    let http = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;
    let client = TelegramClient::new(config.api_base.clone(), config.bot_token.clone())
        .with_http_client(http);
    Ok(TelegramTransport::new(client))
}

fn chain_client(chain: &ChainConfig) -> SuiChainClient {
    let mut node = NodeStreamClient::new(
        chain.ws_url.clone(),
        chain.subscribe_method.clone(),
        chain.packages.clone(),
    );
    if let Some(method) = &chain.checkpoint_method {
        node = node.with_checkpoint_method(method.clone());
    }
    SuiChainClient::new(chain.chain_id.clone(), node)
}

/// Running pipeline workers.
pub struct Pipeline {
    workers: Vec<(String, JoinHandle<()>)>,
}

impl Pipeline {
    /// Spawn every worker.
    pub fn start(
        config: &RuntimeConfig,
        ledger: Arc<dyn Ledger>,
        registry: Arc<dyn SubscriptionRegistry>,
        transport: Arc<dyn BotTransport>,
        dispatch_config: ConfigStore<DispatchConfig>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let mut workers = Vec::new();

        for chain in &config.chains {
            let source = ChainEventSource::new(
                Arc::new(chain_client(chain)),
                ledger.clone(),
                chain.start_height,
                config.ingest.backoff,
                shutdown_rx.clone(),
            );
            let chain_id = chain.chain_id.clone();
            let handle = tokio::spawn(async move {
                if let Err(e) = source.run().await {
                    tracing::error!(
                        chain_id = %chain_id,
                        error = %e,
                        "Chain ingestion stopped, other chains keep running"
                    );
                }
            });
            workers.push((format!("source:{}", chain.chain_id), handle));
        }

        let (task_tx, task_rx) = delivery_task_channel(config.queue_capacity);

        let dispatcher = Dispatcher::new(
            ledger.clone(),
            registry.clone(),
            task_tx,
            dispatch_config,
            shutdown_rx.clone(),
        );
        workers.push(("dispatcher".to_string(), tokio::spawn(dispatcher.run())));

        let sender = NotificationSender::new(
            ledger,
            registry,
            transport,
            Renderer::new(config.explorer_base.clone()),
            config.delivery,
            task_rx,
            shutdown_rx,
        );
        workers.push(("sender".to_string(), tokio::spawn(sender.run())));

        tracing::info!(
            chains = config.chains.len(),
            "Pipeline started"
        );
        Self { workers }
    }

    /// Wait for every worker to stop.
    pub async fn join(self) {
        for (name, handle) in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(worker = %name, error = %e, "Pipeline worker panicked");
            }
        }
        tracing::info!("Pipeline stopped");
    }
}
