//! ChainEventSource processor.
//!
//! One source runs per chain. It is responsible for:
//! - Subscribing to the chain starting right after the persisted cursor
//! - Appending every streamed event to the ledger (duplicates are no-ops)
//! - Advancing the cursor once a block is known to be complete
//! - Reconnecting with jittered exponential backoff when the stream drops
//! - Halting the chain when the stream goes back below the cursor (reorg)
//! - Publishing how far the stream is ahead of the cursor

use crate::chain::{ChainClient, IngestError, StreamItem};
use crate::entities::chain_events::{ChainEvent, EventKey};
use crate::ledger::Ledger;
use crate::metrics::{
    EVENTS_DUPLICATE, EVENTS_INGESTED, REORGS_DETECTED, STREAM_LAG_BLOCKS, STREAM_RECONNECTS,
};
use crate::utils::{Backoff, shutdown_signal};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// How a stream session ended without a fatal error.
enum SessionEnd {
    Shutdown,
    Closed,
}

/// Per-connection ingestion state.
struct Session {
    /// Last height known to be durably confirmed.
    confirmed: Option<u64>,
    /// Keys seen in blocks that are not confirmed yet.
    pending: Vec<EventKey>,
    /// Highest height the stream has reported.
    highest: Option<u64>,
    /// Whether this session moved the cursor.
    progressed: bool,
}

pub struct ChainEventSource {
    client: Arc<dyn ChainClient>,
    ledger: Arc<dyn Ledger>,
    start_height: u64,
    backoff: Backoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl ChainEventSource {
    /// Create a new ChainEventSource.
    ///
    /// `start_height` is only used when the chain has no cursor yet.
    pub fn new(
        client: Arc<dyn ChainClient>,
        ledger: Arc<dyn Ledger>,
        start_height: u64,
        backoff: Backoff,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            ledger,
            start_height,
            backoff,
            shutdown_rx,
        }
    }

    fn chain_id(&self) -> &str {
        self.client.chain_id()
    }

    /// Run until shutdown or a fatal error.
    ///
    /// Fatal errors (reorg, halted chain, ledger consistency violation) stop
    /// only this chain's source.
    pub async fn run(mut self) -> Result<(), IngestError> {
        let chain_id = self.chain_id().to_string();
        info!(chain_id = %chain_id, "ChainEventSource started");

        let mut failures: u32 = 0;
        loop {
            let mut session = Session {
                confirmed: None,
                pending: Vec::new(),
                highest: None,
                progressed: false,
            };
            let result = self.run_session(&mut session).await;
            if session.progressed {
                failures = 0;
            }

            match result {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Closed) => {
                    warn!(chain_id = %chain_id, "Chain stream closed");
                }
                Err(e) if e.is_fatal() => {
                    error!(chain_id = %chain_id, error = %e, "ChainEventSource stopped");
                    return Err(e);
                }
                Err(e) => {
                    warn!(chain_id = %chain_id, error = %e, "Chain stream failed");
                }
            }

            let delay = self.backoff.delay(failures);
            failures = failures.saturating_add(1);
            STREAM_RECONNECTS.with_label_values(&[chain_id.as_str()]).inc();
            info!(
                chain_id = %chain_id,
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting chain stream"
            );

            tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown_rx) => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(chain_id = %chain_id, "ChainEventSource shutdown complete");
        Ok(())
    }

    async fn run_session(&mut self, session: &mut Session) -> Result<SessionEnd, IngestError> {
        let chain_id = self.chain_id().to_string();
        let cursor = self.ledger.cursor(&chain_id).await?;
        if let Some(reason) = cursor.as_ref().and_then(|c| c.halted_reason.clone()) {
            return Err(IngestError::Halted { chain_id, reason });
        }
        session.confirmed = cursor.as_ref().map(|c| c.last_confirmed_height);
        let from = match &cursor {
            Some(c) => c.resume_height(),
            None => self.start_height,
        };

        let mut stream = self.client.subscribe(from).await?;
        debug!(chain_id = %chain_id, from_height = from, "Chain stream opened");

        loop {
            let item = tokio::select! {
                biased;
                _ = shutdown_signal(&mut self.shutdown_rx) => return Ok(SessionEnd::Shutdown),
                item = stream.next() => item,
            };

            match item {
                None => return Ok(SessionEnd::Closed),
                Some(Err(IngestError::Malformed(reason))) => {
                    warn!(chain_id = %chain_id, reason = %reason, "Skipping malformed stream item");
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(item)) => {
                    self.handle_item(session, item).await?;
                    self.publish_lag(session);
                }
            }
        }
    }

    async fn handle_item(&self, session: &mut Session, item: StreamItem) -> Result<(), IngestError> {
        let height = item.block_height();
        if let Some(confirmed) = session.confirmed.filter(|c| height < *c) {
            if matches!(item, StreamItem::BlockSealed(_)) {
                debug!(chain_id = %self.chain_id(), height, "Ignoring seal of a confirmed block");
                return Ok(());
            }
            return Err(self.reorg(confirmed, height).await);
        }
        session.highest = session.highest.max(Some(height));

        match item {
            StreamItem::Event(event) => {
                // Everything below this event's block is complete.
                if height > 0 {
                    self.seal(session, height - 1).await?;
                }
                self.append(session, event).await
            }
            StreamItem::BlockSealed(height) => self.seal(session, height).await,
        }
    }

    async fn append(&self, session: &mut Session, event: ChainEvent) -> Result<(), IngestError> {
        let chain_id = self.chain_id();
        let key = event.key.clone();
        if self.ledger.append(event).await? {
            EVENTS_INGESTED.with_label_values(&[chain_id]).inc();
            debug!(chain_id = %chain_id, event_key = %key, "Event ledgered");
        } else {
            EVENTS_DUPLICATE.with_label_values(&[chain_id]).inc();
            debug!(chain_id = %chain_id, event_key = %key, "Duplicate event ignored");
        }
        session.pending.push(key);
        Ok(())
    }

    fn publish_lag(&self, session: &Session) {
        let Some(highest) = session.highest else {
            return;
        };
        let lag = match session.confirmed {
            Some(confirmed) => highest.saturating_sub(confirmed),
            None => highest.saturating_sub(self.start_height) + 1,
        };
        STREAM_LAG_BLOCKS
            .with_label_values(&[self.chain_id()])
            .set(i64::try_from(lag).unwrap_or(i64::MAX));
    }

    /// Advance the cursor to `height` unless it is already there.
    async fn seal(&self, session: &mut Session, height: u64) -> Result<(), IngestError> {
        if session.confirmed.is_some_and(|c| c >= height) {
            return Ok(());
        }
        // Nothing was read below the first requested height.
        if session.confirmed.is_none() && session.pending.is_empty() && height < self.start_height
        {
            return Ok(());
        }
        self.ledger
            .advance_cursor(self.chain_id(), height, &session.pending)
            .await?;
        session.pending.retain(|k| k.block_height > height);
        session.confirmed = Some(height);
        session.progressed = true;
        debug!(chain_id = %self.chain_id(), height, "Cursor advanced");
        Ok(())
    }

    async fn reorg(&self, confirmed: u64, observed: u64) -> IngestError {
        let chain_id = self.chain_id().to_string();
        REORGS_DETECTED.with_label_values(&[chain_id.as_str()]).inc();
        let reason = format!("observed height {observed} below cursor {confirmed}");
        if let Err(e) = self.ledger.halt_chain(&chain_id, &reason).await {
            error!(chain_id = %chain_id, error = %e, "Failed to record chain halt");
        }
        IngestError::ReorgDetected {
            chain_id,
            cursor: confirmed,
            observed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::testing::{ScriptedChainClient, buy_event};
    use std::time::Duration;

    fn ev(chain: &str, height: u64, index: u32) -> Result<StreamItem, IngestError> {
        Ok(StreamItem::Event(buy_event(chain, height, index, "1")))
    }

    fn source(
        client: Arc<ScriptedChainClient>,
        ledger: Arc<MemoryLedger>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> ChainEventSource {
        ChainEventSource::new(
            client,
            ledger,
            0,
            Backoff::from_millis(10, 100),
            shutdown_rx,
        )
    }

    async fn wait_for_cursor(ledger: &MemoryLedger, chain: &str, height: u64) {
        for _ in 0..1_000 {
            let cursor = ledger.cursor(chain).await.unwrap();
            if cursor.is_some_and(|c| c.last_confirmed_height >= height) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("cursor of {chain} never reached {height}");
    }

    async fn wait_for_subscriptions(client: &ScriptedChainClient, count: usize) {
        for _ in 0..1_000 {
            if client.subscriptions().lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} subscriptions");
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_are_ledgered_and_cursor_advances() {
        let chain = "src-basic";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![vec![
                ev(chain, 100, 0),
                ev(chain, 100, 1),
                ev(chain, 101, 0),
                Ok(StreamItem::BlockSealed(101)),
            ]],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(source(client.clone(), ledger.clone(), shutdown_rx).run());

        wait_for_cursor(&ledger, chain, 101).await;
        wait_for_subscriptions(&client, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(ledger.event_count().await, 3);
        // The stream closed after the first session and was reopened after
        // the cursor.
        let subscriptions = client.subscriptions().lock().unwrap().clone();
        assert_eq!(subscriptions[0], 0);
        assert_eq!(subscriptions[1], 102);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resumes_from_persisted_cursor() {
        let chain = "src-resume";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![
                // Dropped before 101 was sealed.
                vec![ev(chain, 100, 0), ev(chain, 101, 0)],
                // Node replays 101 after reconnecting.
                vec![
                    ev(chain, 101, 0),
                    ev(chain, 102, 0),
                    Ok(StreamItem::BlockSealed(102)),
                ],
            ],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(source(client.clone(), ledger.clone(), shutdown_rx).run());

        wait_for_cursor(&ledger, chain, 102).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let subscriptions = client.subscriptions().lock().unwrap().clone();
        assert_eq!(&subscriptions[..2], &[0, 101]);
        assert_eq!(ledger.event_count().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_from_stream_is_ledgered_once() {
        let chain = "src-dup";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![vec![
                ev(chain, 100, 0),
                ev(chain, 100, 0),
                Ok(StreamItem::BlockSealed(100)),
            ]],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(source(client, ledger.clone(), shutdown_rx).run());

        wait_for_cursor(&ledger, chain, 100).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(ledger.event_count().await, 1);
        assert_eq!(EVENTS_DUPLICATE.with_label_values(&[chain]).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivered_confirmed_block_is_a_duplicate() {
        let chain = "src-redeliver";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![vec![
                ev(chain, 100, 0),
                ev(chain, 101, 0),
                // 100 is confirmed by now; the node sends it again.
                ev(chain, 100, 0),
                Ok(StreamItem::BlockSealed(101)),
            ]],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(source(client, ledger.clone(), shutdown_rx).run());

        wait_for_cursor(&ledger, chain, 101).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let cursor = ledger.cursor(chain).await.unwrap().unwrap();
        assert_eq!(cursor.halted_reason, None);
        assert_eq!(ledger.event_count().await, 2);
        assert_eq!(EVENTS_DUPLICATE.with_label_values(&[chain]).get(), 1);
        assert_eq!(REORGS_DETECTED.with_label_values(&[chain]).get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_lag_counts_unconfirmed_blocks() {
        let chain = "src-lag";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![vec![ev(chain, 100, 0), ev(chain, 101, 0), ev(chain, 103, 0)]],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(source(client.clone(), ledger.clone(), shutdown_rx).run());

        // 103 arrived, so everything up to 102 is sealed.
        wait_for_cursor(&ledger, chain, 102).await;
        wait_for_subscriptions(&client, 2).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(STREAM_LAG_BLOCKS.with_label_values(&[chain]).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorg_halts_chain() {
        let chain = "src-reorg";
        let client = Arc::new(ScriptedChainClient::new(
            chain,
            vec![vec![
                ev(chain, 100, 0),
                Ok(StreamItem::BlockSealed(100)),
                ev(chain, 99, 0),
            ]],
        ));
        let ledger = Arc::new(MemoryLedger::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = source(client, ledger.clone(), shutdown_rx)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::ReorgDetected {
                cursor: 100,
                observed: 99,
                ..
            }
        ));
        let cursor = ledger.cursor(chain).await.unwrap().unwrap();
        assert_eq!(cursor.last_confirmed_height, 100);
        assert!(cursor.halted_reason.is_some());
        assert_eq!(REORGS_DETECTED.with_label_values(&[chain]).get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_halted_chain_refuses_to_start() {
        let chain = "src-halted";
        let client = Arc::new(ScriptedChainClient::new(chain, vec![]));
        let ledger = Arc::new(MemoryLedger::new());
        ledger.halt_chain(chain, "manual").await.unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = source(client.clone(), ledger, shutdown_rx)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Halted { .. }));
        assert!(client.subscriptions().lock().unwrap().is_empty());
    }
}
