//! Signal handling for graceful shutdown and config reload.

use crate::config::ConfigLoader;
use crate::state::AdminConfig;
use chainbell_core::config::{ConfigStore, DispatchConfig};
use chainbell_core::utils::shutdown_signal as pipeline_stopped;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

/// Wait for `kind`. If the handler cannot be installed, wait forever.
async fn wait_for(kind: SignalKind, name: &str) {
    match signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install {} handler", name);
            std::future::pending::<()>().await;
        }
    }
}

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C).
pub async fn shutdown_signal() {
    tokio::select! {
        _ = wait_for(SignalKind::terminate(), "SIGTERM") => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = wait_for(SignalKind::interrupt(), "SIGINT") => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// The dispatch section and the admin token apply immediately. Chains,
/// ingest and delivery settings are only read at startup.
pub fn spawn_config_reload_handler(
    config_loader: Arc<ConfigLoader>,
    admin: Arc<RwLock<AdminConfig>>,
    dispatch_store: ConfigStore<DispatchConfig>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = pipeline_stopped(&mut shutdown_rx) => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.load() {
                        Ok(config) => {
                            *admin.write().await =
                                AdminConfig::new(config.server.admin_token.as_deref());
                            dispatch_store.update(config.dispatch);
                            tracing::info!("Configuration reloaded successfully");
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
            }
        }
    })
}
