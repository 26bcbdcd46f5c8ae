//! Dispatcher processor.
//!
//! The Dispatcher polls the ledger on a reloadable interval. Each tick it:
//! - Matches newly ledgered events against the subscription registry and
//!   records one `pending` pair per matched recipient
//! - Enqueues `pending` pairs into the bounded dispatch queue, waiting for
//!   capacity, and marks each `dispatched` once it is enqueued

use crate::config::{ConfigStore, DispatchConfig};
use crate::entities::ProcessingStatus;
use crate::events::{DeliveryTask, DeliveryTaskSender};
use crate::ledger::{ConsistencyViolation, Ledger, LedgerError};
use crate::metrics::{LEDGER_BACKLOG, NOTIFICATIONS_DISPATCHED};
use crate::registry::{RegistryError, SubscriptionRegistry};
use crate::utils::{is_shutdown, shutdown_signal};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("dispatch queue closed")]
    QueueClosed,
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub events_matched: usize,
    pub pairs_created: usize,
    pub pairs_dispatched: usize,
    pub interrupted: bool,
}

pub struct Dispatcher {
    ledger: Arc<dyn Ledger>,
    registry: Arc<dyn SubscriptionRegistry>,
    task_tx: DeliveryTaskSender,
    config: ConfigStore<DispatchConfig>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        registry: Arc<dyn SubscriptionRegistry>,
        task_tx: DeliveryTaskSender,
        config: ConfigStore<DispatchConfig>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ledger,
            registry,
            task_tx,
            config,
            shutdown_rx,
        }
    }

    /// Run the Dispatcher.
    pub async fn run(mut self) {
        info!("Dispatcher started");
        let mut watcher = self.config.subscribe();

        loop {
            let config = self.config.snapshot();
            match self.tick(&config).await {
                Ok(summary) if summary.interrupted => break,
                Ok(summary) => {
                    if summary.events_matched > 0 || summary.pairs_dispatched > 0 {
                        debug!(
                            events_matched = summary.events_matched,
                            pairs_created = summary.pairs_created,
                            pairs_dispatched = summary.pairs_dispatched,
                            "Dispatch tick complete"
                        );
                    }
                }
                Err(DispatchError::QueueClosed) => {
                    info!("Dispatch queue closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Dispatch tick failed");
                }
            }

            tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown_rx) => break,
                Ok(reloaded) = watcher.changed() => {
                    info!(
                        poll_interval_ms = reloaded.poll_interval.as_millis() as u64,
                        batch_limit = reloaded.batch_limit,
                        "Dispatch config reloaded"
                    );
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }

        info!("Dispatcher shutdown complete");
    }

    /// Match and dispatch one batch.
    pub async fn tick(&mut self, config: &DispatchConfig) -> Result<TickSummary, DispatchError> {
        let mut summary = TickSummary::default();

        let events = self.ledger.list_unmatched(config.batch_limit).await?;
        for event in events {
            if is_shutdown(&self.shutdown_rx) {
                summary.interrupted = true;
                return Ok(summary);
            }
            let matches = self.registry.match_event(&event).await?;
            let created = self.ledger.record_matches(&event.key, &matches).await?;
            debug!(
                event_key = %event.key,
                recipients = matches.len(),
                created,
                "Event matched"
            );
            summary.events_matched += 1;
            summary.pairs_created += created;
        }

        let pairs = self.ledger.list_unprocessed(config.batch_limit).await?;
        for pair in pairs {
            let permit = tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown_rx) => {
                    summary.interrupted = true;
                    return Ok(summary);
                }
                permit = self.task_tx.reserve() => {
                    permit.map_err(|_| DispatchError::QueueClosed)?
                }
            };
            permit.send(DeliveryTask::from(&pair));

            match self
                .ledger
                .mark_status(&pair.key, &pair.recipient_id, ProcessingStatus::Dispatched)
                .await
            {
                Ok(()) => {}
                // The sender finished the pair before we got here.
                Err(LedgerError::Consistency(ConsistencyViolation::StatusRegression {
                    from, ..
                })) => {
                    debug!(
                        event_key = %pair.key,
                        recipient_id = %pair.recipient_id,
                        status = %from,
                        "Pair already moved past pending"
                    );
                }
                Err(e) => return Err(e.into()),
            }
            NOTIFICATIONS_DISPATCHED
                .with_label_values(&[pair.key.chain_id.as_str()])
                .inc();
            summary.pairs_dispatched += 1;
        }

        let backlog = self.ledger.backlog_depth().await?;
        LEDGER_BACKLOG.set(i64::try_from(backlog).unwrap_or(i64::MAX));

        Ok(summary)
    }
}
