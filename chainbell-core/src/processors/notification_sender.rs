//! NotificationSender processor.
//!
//! The NotificationSender is responsible for:
//! - Receiving `DeliveryTask`s from the dispatch queue
//! - Routing each task to a lane owned by its recipient, so one recipient's
//!   notifications go out in chain order while recipients proceed in parallel
//! - Rendering and sending through the bot transport, retrying transient
//!   failures with backoff and giving up after `max_attempts`
//! - Recording the outcome of every attempt in the ledger
//!
//! On start it picks up pairs a previous run left `dispatched`.
//!
//! Lane queues are unbounded: routing never waits on a slow recipient. The
//! dispatch queue in front of the sender stays bounded.

use crate::config::DeliveryConfig;
use crate::entities::{ProcessingStatus, RecipientId};
use crate::events::{DeliveryTask, DeliveryTaskReceiver};
use crate::ledger::{ConsistencyViolation, Ledger, LedgerError};
use crate::metrics::{DELIVERY_ATTEMPTS, NOTIFICATIONS_DELIVERED, NOTIFICATIONS_FAILED_PERMANENT};
use crate::registry::SubscriptionRegistry;
use crate::rendering::Renderer;
use crate::transport::{BotTransport, DeliveryError};
use crate::utils::{is_shutdown, shutdown_signal};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What became of one delivery task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    FailedPermanent,
    /// Already terminal or no longer in the ledger.
    Skipped,
    /// Shutdown while waiting to retry. The pair stays `dispatched`.
    Interrupted,
}

struct SenderContext {
    ledger: Arc<dyn Ledger>,
    registry: Arc<dyn SubscriptionRegistry>,
    transport: Arc<dyn BotTransport>,
    renderer: Renderer,
    config: DeliveryConfig,
    permits: Semaphore,
}

struct Lane {
    tx: mpsc::UnboundedSender<DeliveryTask>,
    handle: JoinHandle<()>,
}

pub struct NotificationSender {
    ctx: Arc<SenderContext>,
    task_rx: DeliveryTaskReceiver,
    lanes: HashMap<RecipientId, Lane>,
    shutdown_rx: watch::Receiver<bool>,
}

impl NotificationSender {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        registry: Arc<dyn SubscriptionRegistry>,
        transport: Arc<dyn BotTransport>,
        renderer: Renderer,
        config: DeliveryConfig,
        task_rx: DeliveryTaskReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            ctx: Arc::new(SenderContext {
                ledger,
                registry,
                transport,
                renderer,
                config,
                permits,
            }),
            task_rx,
            lanes: HashMap::new(),
            shutdown_rx,
        }
    }

    /// Run the NotificationSender.
    pub async fn run(mut self) {
        info!("NotificationSender started");

        if let Err(e) = self.recover_in_flight().await {
            error!(error = %e, "Failed to recover in-flight notifications");
        }

        let reap_every = self.ctx.config.lane_idle.max(Duration::from_millis(1));
        let mut reap = tokio::time::interval(reap_every);
        reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        reap.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown_signal(&mut self.shutdown_rx) => {
                    info!("NotificationSender received shutdown signal");
                    break;
                }

                task = self.task_rx.recv() => match task {
                    Some(task) => self.route(task),
                    None => {
                        info!("Dispatch queue closed");
                        break;
                    }
                },

                _ = reap.tick() => self.reap_lanes(),
            }
        }

        // Lanes finish what they hold unless shutdown stops them first.
        for (_, lane) in self.lanes.drain() {
            drop(lane.tx);
            let _ = lane.handle.await;
        }

        info!("NotificationSender shutdown complete");
    }

    async fn recover_in_flight(&mut self) -> Result<(), LedgerError> {
        let pairs = self.ctx.ledger.list_in_flight().await?;
        if !pairs.is_empty() {
            info!(count = pairs.len(), "Resuming in-flight notifications");
        }
        for pair in &pairs {
            self.route(DeliveryTask::from(pair));
        }
        Ok(())
    }

    fn route(&mut self, task: DeliveryTask) {
        if is_shutdown(&self.shutdown_rx) {
            return;
        }
        let recipient = task.recipient_id.clone();
        let lane = match self.lanes.remove(&recipient) {
            Some(lane) if !lane.tx.is_closed() => lane,
            previous => self.spawn_lane(&recipient, previous.map(|lane| lane.handle)),
        };

        let lane = match lane.tx.send(task) {
            Ok(()) => lane,
            // The lane went idle after the check above.
            Err(mpsc::error::SendError(task)) => {
                let lane = self.spawn_lane(&recipient, Some(lane.handle));
                if lane.tx.send(task).is_err() {
                    debug!(recipient_id = %recipient, "Lane stopped, task left for recovery");
                }
                lane
            }
        };
        self.lanes.insert(recipient, lane);
    }

    /// Start a lane for `recipient`. It waits for `predecessor`, the lane it
    /// replaces, so tasks stay in order across the handover.
    fn spawn_lane(&self, recipient: &RecipientId, predecessor: Option<JoinHandle<()>>) -> Lane {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Arc::clone(&self.ctx);
        let recipient = recipient.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            if let Some(predecessor) = predecessor {
                let _ = predecessor.await;
            }
            run_lane(ctx, recipient, rx, shutdown_rx).await;
        });
        Lane { tx, handle }
    }

    fn reap_lanes(&mut self) {
        self.lanes.retain(|_, lane| !lane.handle.is_finished());
    }
}

async fn run_lane(
    ctx: Arc<SenderContext>,
    recipient: RecipientId,
    mut rx: mpsc::UnboundedReceiver<DeliveryTask>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(recipient_id = %recipient, "Lane opened");
    loop {
        tokio::select! {
            biased;

            _ = shutdown_signal(&mut shutdown_rx) => break,

            task = rx.recv() => match task {
                Some(task) => ctx.settle(&task, &mut shutdown_rx).await,
                None => break,
            },

            _ = tokio::time::sleep(ctx.config.lane_idle) => {
                rx.close();
                while let Ok(task) = rx.try_recv() {
                    if is_shutdown(&shutdown_rx) {
                        break;
                    }
                    ctx.settle(&task, &mut shutdown_rx).await;
                }
                break;
            }
        }
    }
    debug!(recipient_id = %recipient, "Lane closed");
}

impl SenderContext {
    /// Deliver `task`, retrying ledger failures with backoff until the pair
    /// settles or shutdown. The lane takes no other task meanwhile.
    async fn settle(&self, task: &DeliveryTask, shutdown_rx: &mut watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            let e = match self.deliver(task, shutdown_rx).await {
                Ok(_) => return,
                Err(e) => e,
            };
            let delay = self.config.backoff.delay(failures);
            failures = failures.saturating_add(1);
            error!(
                event_key = %task.key,
                recipient_id = %task.recipient_id,
                error = %e,
                attempt = failures,
                retry_in_ms = delay.as_millis() as u64,
                "Ledger error during delivery, retrying"
            );
            tokio::select! {
                biased;
                _ = shutdown_signal(shutdown_rx) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    #[tracing::instrument(
        skip_all,
        fields(event_key = %task.key, recipient_id = %task.recipient_id)
    )]
    async fn deliver(
        &self,
        task: &DeliveryTask,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<DeliveryOutcome, LedgerError> {
        let Some(pair) = self.ledger.pair(&task.key, &task.recipient_id).await? else {
            warn!("Delivery pair not found");
            return Ok(DeliveryOutcome::Skipped);
        };
        if pair.status.is_terminal() {
            debug!(status = %pair.status, "Pair already settled");
            return Ok(DeliveryOutcome::Skipped);
        }
        let Some(event) = self.ledger.event(&task.key).await? else {
            return self.give_up(task, "event missing from ledger").await;
        };

        let display = match pair.subscription_id {
            Some(id) => match self.registry.get(id).await {
                Ok(subscription) => subscription.map(|s| s.display),
                Err(e) => {
                    warn!(subscription_id = %id, error = %e, "Using default display");
                    None
                }
            },
            None => None,
        };
        let alert = self.renderer.render(&event, display.as_ref());

        let chain_id = task.key.chain_id.as_str();
        let max_attempts = self.config.max_attempts;
        let mut attempts = pair.attempts;
        loop {
            if attempts >= max_attempts {
                return self.give_up(task, "attempt limit reached").await;
            }

            let result = {
                let _permit = self.permits.acquire().await.ok();
                DELIVERY_ATTEMPTS.with_label_values(&[chain_id]).inc();
                self.transport.send(&task.recipient_id, &alert).await
            };

            match result {
                Ok(()) => return self.record_delivered(task, attempts + 1, shutdown_rx).await,
                Err(DeliveryError::Permanent(reason)) => {
                    self.ledger
                        .record_attempt(&task.key, &task.recipient_id, &reason)
                        .await?;
                    return self.give_up(task, &reason).await;
                }
                Err(DeliveryError::Transient {
                    reason,
                    retry_after,
                }) => {
                    attempts = self
                        .ledger
                        .record_attempt(&task.key, &task.recipient_id, &reason)
                        .await?;
                    if attempts >= max_attempts {
                        return self.give_up(task, &reason).await;
                    }
                    let delay = retry_after
                        .unwrap_or_else(|| self.config.backoff.delay(attempts.saturating_sub(1)));
                    warn!(
                        attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Delivery failed, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_signal(shutdown_rx) => {
                            return Ok(DeliveryOutcome::Interrupted);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Mark a sent notification delivered. Ledger failures are retried here
    /// so the message is not sent again.
    async fn record_delivered(
        &self,
        task: &DeliveryTask,
        attempt: u32,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<DeliveryOutcome, LedgerError> {
        let mut failures: u32 = 0;
        loop {
            match self
                .ledger
                .mark_status(&task.key, &task.recipient_id, ProcessingStatus::Delivered)
                .await
            {
                Ok(()) => {
                    NOTIFICATIONS_DELIVERED
                        .with_label_values(&[task.key.chain_id.as_str()])
                        .inc();
                    info!(attempt, "Notification delivered");
                    return Ok(DeliveryOutcome::Delivered);
                }
                Err(LedgerError::Consistency(ConsistencyViolation::StatusRegression {
                    from, ..
                })) => {
                    debug!(status = %from, "Pair settled elsewhere");
                    return Ok(DeliveryOutcome::Skipped);
                }
                Err(e) => {
                    let delay = self.config.backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    warn!(
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Failed to record delivery, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown_signal(shutdown_rx) => return Ok(DeliveryOutcome::Interrupted),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn give_up(
        &self,
        task: &DeliveryTask,
        reason: &str,
    ) -> Result<DeliveryOutcome, LedgerError> {
        match self
            .ledger
            .mark_status(&task.key, &task.recipient_id, ProcessingStatus::FailedPermanent)
            .await
        {
            Ok(()) => {
                NOTIFICATIONS_FAILED_PERMANENT
                    .with_label_values(&[task.key.chain_id.as_str()])
                    .inc();
                warn!(reason, "Notification failed permanently");
                Ok(DeliveryOutcome::FailedPermanent)
            }
            Err(LedgerError::Consistency(ConsistencyViolation::StatusRegression {
                from, ..
            })) => {
                debug!(status = %from, "Pair settled elsewhere");
                Ok(DeliveryOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }
}
