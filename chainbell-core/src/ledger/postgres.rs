use super::{ConsistencyViolation, Ledger, LedgerError, check_cursor_move, sealed_keys};
use crate::entities::chain_events::{
    ChainEvent, EventKey, GetChainEvent, InsertChainEvent, ListUnmatchedChainEvents,
};
use crate::entities::cursors::{ChainCursor, GetChainCursor, HaltChainCursor};
use crate::entities::delivery_status::{
    CountBacklog, DeliveryPair, GetDeliveryPair, IncrementDeliveryAttempts, ListPairsByStatus,
};
use crate::entities::{ProcessingStatus, RecipientId};
use crate::framework::DatabaseProcessor;
use crate::registry::SubscriptionMatch;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;

/// Upper bound for a single in-flight recovery read.
const IN_FLIGHT_LIMIT: i64 = 10_000;

/// PostgreSQL-backed [`Ledger`].
#[derive(Debug, Clone)]
pub struct PgLedger {
    db: DatabaseProcessor,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }

    async fn require_pair(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
    ) -> Result<DeliveryPair, LedgerError> {
        self.pair(key, recipient_id)
            .await?
            .ok_or_else(|| LedgerError::PairNotFound {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
            })
    }
}

fn to_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl Ledger for PgLedger {
    async fn append(&self, event: ChainEvent) -> Result<bool, LedgerError> {
        Ok(self.db.process(InsertChainEvent { event }).await?)
    }

    #[tracing::instrument(skip(self, observed), err)]
    async fn advance_cursor(
        &self,
        chain_id: &str,
        height: u64,
        observed: &[EventKey],
    ) -> Result<(), LedgerError> {
        let mut tx = self.db.begin().await?;

        let current = ChainCursor::lock_for_update(&mut tx, chain_id).await?;
        check_cursor_move(chain_id, current.as_ref(), height)?;

        let sealed: Vec<EventKey> = sealed_keys(chain_id, height, observed).cloned().collect();
        let missing = ChainEvent::find_missing(&mut tx, &sealed).await?;
        if !missing.is_empty() {
            return Err(ConsistencyViolation::MissingEvents {
                chain_id: chain_id.to_string(),
                height,
                missing,
            }
            .into());
        }

        if current.is_none_or(|c| c.last_confirmed_height < height) {
            ChainCursor::upsert(&mut tx, chain_id, height).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn cursor(&self, chain_id: &str) -> Result<Option<ChainCursor>, LedgerError> {
        Ok(self
            .db
            .process(GetChainCursor {
                chain_id: chain_id.to_string(),
            })
            .await?)
    }

    async fn halt_chain(&self, chain_id: &str, reason: &str) -> Result<(), LedgerError> {
        self.db
            .process(HaltChainCursor {
                chain_id: chain_id.to_string(),
                reason: reason.to_string(),
            })
            .await?;
        Ok(())
    }

    async fn list_unmatched(&self, limit: usize) -> Result<Vec<ChainEvent>, LedgerError> {
        Ok(self
            .db
            .process(ListUnmatchedChainEvents {
                limit: to_limit(limit),
            })
            .await?)
    }

    #[tracing::instrument(skip(self, matches), fields(event_key = %key), err)]
    async fn record_matches(
        &self,
        key: &EventKey,
        matches: &[SubscriptionMatch],
    ) -> Result<usize, LedgerError> {
        let mut tx = self.db.begin().await?;
        if !ChainEvent::find_missing(&mut tx, std::slice::from_ref(key))
            .await?
            .is_empty()
        {
            return Err(LedgerError::EventNotFound(key.clone()));
        }
        let mut created = 0;
        for m in matches {
            if DeliveryPair::insert_pending(&mut tx, key, &m.recipient_id, Some(m.subscription_id))
                .await?
            {
                created += 1;
            }
        }
        ChainEvent::mark_matched(&mut tx, key).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<DeliveryPair>, LedgerError> {
        Ok(self
            .db
            .process(ListPairsByStatus {
                status: ProcessingStatus::Pending,
                limit: to_limit(limit),
            })
            .await?)
    }

    async fn list_in_flight(&self) -> Result<Vec<DeliveryPair>, LedgerError> {
        Ok(self
            .db
            .process(ListPairsByStatus {
                status: ProcessingStatus::Dispatched,
                limit: IN_FLIGHT_LIMIT,
            })
            .await?)
    }

    async fn mark_status(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        status: ProcessingStatus,
    ) -> Result<(), LedgerError> {
        let mut db = self.db.clone();
        let changed =
            DeliveryPair::compare_and_set_status(&mut db, key, recipient_id, status).await?;
        if changed == 1 {
            return Ok(());
        }
        let current = self.require_pair(key, recipient_id).await?;
        Err(ConsistencyViolation::StatusRegression {
            key: key.clone(),
            recipient_id: recipient_id.clone(),
            from: current.status,
            to: status,
        }
        .into())
    }

    async fn record_attempt(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        error: &str,
    ) -> Result<u32, LedgerError> {
        let attempts = self
            .db
            .process(IncrementDeliveryAttempts {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
                error: error.to_string(),
            })
            .await?;
        if let Some(attempts) = attempts {
            return Ok(attempts);
        }
        let current = self.require_pair(key, recipient_id).await?;
        Err(ConsistencyViolation::TerminalPair {
            key: key.clone(),
            recipient_id: recipient_id.clone(),
            status: current.status,
        }
        .into())
    }

    async fn pair(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
    ) -> Result<Option<DeliveryPair>, LedgerError> {
        Ok(self
            .db
            .process(GetDeliveryPair {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
            })
            .await?)
    }

    async fn event(&self, key: &EventKey) -> Result<Option<ChainEvent>, LedgerError> {
        Ok(self.db.process(GetChainEvent { key: key.clone() }).await?)
    }

    async fn backlog_depth(&self) -> Result<u64, LedgerError> {
        let count = self.db.process(CountBacklog).await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}

/// These run against a scratch database created per test from
/// `migrations/`. Set `DATABASE_URL` and pass `--ignored` to run them.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{buy_event, sub_match};

    #[test]
    fn test_limit_saturates() {
        assert_eq!(to_limit(25), 25);
        assert_eq!(to_limit(usize::MAX), i64::MAX);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_append_and_cursor(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        let event = buy_event("sui", 100, 0, "1.5");
        let key = event.key.clone();
        let missing = EventKey::new("sui", 100, 1);

        assert!(ledger.append(event.clone()).await.unwrap());
        assert!(!ledger.append(event.clone()).await.unwrap());
        assert_eq!(ledger.event(&key).await.unwrap(), Some(event));

        let err = ledger
            .advance_cursor("sui", 100, &[key.clone(), missing.clone()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consistency(ConsistencyViolation::MissingEvents { missing: ref m, .. })
                if *m == vec![missing.clone()]
        ));
        assert_eq!(ledger.cursor("sui").await.unwrap(), None);

        ledger.advance_cursor("sui", 100, &[key]).await.unwrap();
        ledger.advance_cursor("sui", 100, &[]).await.unwrap();
        assert_eq!(
            ledger.cursor("sui").await.unwrap().unwrap().last_confirmed_height,
            100
        );

        let err = ledger.advance_cursor("sui", 99, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consistency(ConsistencyViolation::CursorRegression { .. })
        ));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_halted_chain_keeps_its_cursor(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        ledger.advance_cursor("sui", 10, &[]).await.unwrap();
        ledger.halt_chain("sui", "observed height 9 below cursor 10").await.unwrap();

        let err = ledger.advance_cursor("sui", 11, &[]).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consistency(ConsistencyViolation::ChainHalted { .. })
        ));
        let cursor = ledger.cursor("sui").await.unwrap().unwrap();
        assert_eq!(cursor.last_confirmed_height, 10);
        assert!(cursor.halted_reason.is_some());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_record_matches(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        let event = buy_event("sui", 100, 0, "1");
        let key = event.key.clone();

        let err = ledger
            .record_matches(&key, &[sub_match("-1001", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::EventNotFound(ref k) if k == &key));

        ledger.append(event).await.unwrap();
        assert_eq!(ledger.list_unmatched(10).await.unwrap().len(), 1);
        let matches = [sub_match("-1001", 1), sub_match("@alerts", 2)];
        assert_eq!(ledger.record_matches(&key, &matches).await.unwrap(), 2);
        assert_eq!(ledger.record_matches(&key, &matches).await.unwrap(), 0);
        assert!(ledger.list_unmatched(10).await.unwrap().is_empty());
        assert_eq!(ledger.backlog_depth().await.unwrap(), 2);

        let pair = ledger
            .pair(&key, &RecipientId::new("@alerts"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.status, ProcessingStatus::Pending);
        assert_eq!(pair.subscription_id, Some(uuid::Uuid::from_u128(2)));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_pending_pairs_in_height_order(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        for (height, index) in [(102, 0), (100, 1), (101, 0), (100, 0)] {
            let event = buy_event("sui", height, index, "1");
            let key = event.key.clone();
            ledger.append(event).await.unwrap();
            ledger
                .record_matches(&key, &[sub_match("-1001", 1)])
                .await
                .unwrap();
        }
        let order: Vec<(u64, u32)> = ledger
            .list_unprocessed(10)
            .await
            .unwrap()
            .iter()
            .map(|p| (p.key.block_height, p.key.log_index))
            .collect();
        assert_eq!(order, vec![(100, 0), (100, 1), (101, 0), (102, 0)]);
        assert_eq!(ledger.list_unprocessed(2).await.unwrap().len(), 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires DATABASE_URL"]
    async fn test_status_only_moves_forward(pool: PgPool) {
        let ledger = PgLedger::new(pool);
        let event = buy_event("sui", 100, 0, "1");
        let key = event.key.clone();
        let recipient = RecipientId::new("-1001");
        ledger.append(event).await.unwrap();
        ledger
            .record_matches(&key, &[sub_match("-1001", 1)])
            .await
            .unwrap();

        ledger
            .mark_status(&key, &recipient, ProcessingStatus::Dispatched)
            .await
            .unwrap();
        assert_eq!(ledger.list_in_flight().await.unwrap().len(), 1);
        assert_eq!(
            ledger.record_attempt(&key, &recipient, "timeout").await.unwrap(),
            1
        );

        let err = ledger
            .mark_status(&key, &recipient, ProcessingStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consistency(ConsistencyViolation::StatusRegression {
                from: ProcessingStatus::Dispatched,
                to: ProcessingStatus::Pending,
                ..
            })
        ));

        ledger
            .mark_status(&key, &recipient, ProcessingStatus::Delivered)
            .await
            .unwrap();
        assert!(
            ledger
                .mark_status(&key, &recipient, ProcessingStatus::FailedPermanent)
                .await
                .unwrap_err()
                .is_consistency_violation()
        );
        let err = ledger
            .record_attempt(&key, &recipient, "late")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Consistency(ConsistencyViolation::TerminalPair { .. })
        ));
        assert!(matches!(
            ledger
                .mark_status(&EventKey::new("sui", 1, 0), &recipient, ProcessingStatus::Delivered)
                .await
                .unwrap_err(),
            LedgerError::PairNotFound { .. }
        ));
        assert_eq!(ledger.backlog_depth().await.unwrap(), 0);
    }
}
