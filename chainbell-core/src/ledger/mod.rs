//! Event ledger: the durable source of truth for observed chain events,
//! per-chain cursors and per-recipient delivery state.
//!
//! Workers never talk to each other directly; they coordinate through a
//! [`Ledger`]. Two implementations are provided:
//!
//! - [`PgLedger`]: PostgreSQL via sqlx, used in production
//! - [`MemoryLedger`]: in-process, used by tests and `--memory-ledger` dry runs
//!
//! Both enforce the same invariants: event keys are unique, cursors never
//! move backwards or past a block with missing events, and delivery status
//! only moves forward.

mod memory;
mod postgres;

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

use crate::entities::chain_events::{ChainEvent, EventKey};
use crate::entities::cursors::ChainCursor;
use crate::entities::delivery_status::DeliveryPair;
use crate::entities::{ProcessingStatus, RecipientId};
use crate::registry::SubscriptionMatch;
use async_trait::async_trait;
use thiserror::Error;

/// A ledger operation that would break one of the ledger's invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    #[error("cannot advance {chain_id} to {height}: {} observed event(s) not ledgered", missing.len())]
    MissingEvents {
        chain_id: String,
        height: u64,
        missing: Vec<EventKey>,
    },

    #[error("cursor of {chain_id} is at {current}, refusing to move back to {requested}")]
    CursorRegression {
        chain_id: String,
        current: u64,
        requested: u64,
    },

    #[error("{key} -> {recipient_id}: illegal status transition {from} -> {to}")]
    StatusRegression {
        key: EventKey,
        recipient_id: RecipientId,
        from: ProcessingStatus,
        to: ProcessingStatus,
    },

    #[error("{key} -> {recipient_id} is already {status}")]
    TerminalPair {
        key: EventKey,
        recipient_id: RecipientId,
        status: ProcessingStatus,
    },

    #[error("chain {chain_id} is halted: {reason}")]
    ChainHalted { chain_id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("ledger consistency violation: {0}")]
    Consistency(#[from] ConsistencyViolation),

    #[error("event {0} is not in the ledger")]
    EventNotFound(EventKey),

    #[error("no delivery record for {key} -> {recipient_id}")]
    PairNotFound {
        key: EventKey,
        recipient_id: RecipientId,
    },
}

impl LedgerError {
    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, LedgerError::Consistency(_))
    }
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Persist an event. Returns `false` if the key was already present, in
    /// which case nothing changes.
    async fn append(&self, event: ChainEvent) -> Result<bool, LedgerError>;

    /// Move the cursor of `chain_id` to `height`.
    ///
    /// `observed` are the keys the caller saw for the blocks being sealed;
    /// every one at or below `height` must already be ledgered.
    async fn advance_cursor(
        &self,
        chain_id: &str,
        height: u64,
        observed: &[EventKey],
    ) -> Result<(), LedgerError>;

    async fn cursor(&self, chain_id: &str) -> Result<Option<ChainCursor>, LedgerError>;

    /// Stop ingestion for a chain until the marker is cleared externally.
    async fn halt_chain(&self, chain_id: &str, reason: &str) -> Result<(), LedgerError>;

    /// Events not yet run through subscription matching, in chain order.
    async fn list_unmatched(&self, limit: usize) -> Result<Vec<ChainEvent>, LedgerError>;

    /// Create one `Pending` pair per match and mark the event matched.
    ///
    /// Idempotent. Returns the number of pairs newly created. Fails with
    /// [`LedgerError::EventNotFound`] if the event was never appended.
    async fn record_matches(
        &self,
        key: &EventKey,
        matches: &[SubscriptionMatch],
    ) -> Result<usize, LedgerError>;

    /// `Pending` pairs, oldest event first.
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<DeliveryPair>, LedgerError>;

    /// `Dispatched` pairs, oldest event first.
    async fn list_in_flight(&self) -> Result<Vec<DeliveryPair>, LedgerError>;

    /// Forward-only status change. Anything else is a consistency violation.
    async fn mark_status(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        status: ProcessingStatus,
    ) -> Result<(), LedgerError>;

    /// Count a failed delivery attempt. Returns the new attempt count.
    async fn record_attempt(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        error: &str,
    ) -> Result<u32, LedgerError>;

    async fn pair(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
    ) -> Result<Option<DeliveryPair>, LedgerError>;

    async fn event(&self, key: &EventKey) -> Result<Option<ChainEvent>, LedgerError>;

    /// Pairs that are not yet terminal.
    async fn backlog_depth(&self) -> Result<u64, LedgerError>;
}

/// Keys in `observed` that belong to `chain_id` and are sealed by `height`.
fn sealed_keys<'a>(
    chain_id: &'a str,
    height: u64,
    observed: &'a [EventKey],
) -> impl Iterator<Item = &'a EventKey> + 'a {
    observed
        .iter()
        .filter(move |k| k.chain_id == chain_id && k.block_height <= height)
}

/// Reject a cursor move that is not allowed by the current cursor state.
fn check_cursor_move(
    chain_id: &str,
    current: Option<&ChainCursor>,
    height: u64,
) -> Result<(), ConsistencyViolation> {
    let Some(cursor) = current else {
        return Ok(());
    };
    if let Some(reason) = &cursor.halted_reason {
        return Err(ConsistencyViolation::ChainHalted {
            chain_id: chain_id.to_string(),
            reason: reason.clone(),
        });
    }
    if height < cursor.last_confirmed_height {
        return Err(ConsistencyViolation::CursorRegression {
            chain_id: chain_id.to_string(),
            current: cursor.last_confirmed_height,
            requested: height,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(height: u64, halted: Option<&str>) -> ChainCursor {
        ChainCursor {
            chain_id: "sui".to_string(),
            last_confirmed_height: height,
            halted_reason: halted.map(str::to_string),
            updated_at: time::OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_cursor_move_rules() {
        assert!(check_cursor_move("sui", None, 0).is_ok());
        assert!(check_cursor_move("sui", Some(&cursor(10, None)), 10).is_ok());
        assert!(check_cursor_move("sui", Some(&cursor(10, None)), 11).is_ok());
        assert_eq!(
            check_cursor_move("sui", Some(&cursor(10, None)), 9),
            Err(ConsistencyViolation::CursorRegression {
                chain_id: "sui".to_string(),
                current: 10,
                requested: 9,
            })
        );
        assert!(matches!(
            check_cursor_move("sui", Some(&cursor(10, Some("reorg"))), 11),
            Err(ConsistencyViolation::ChainHalted { .. })
        ));
    }

    #[test]
    fn test_sealed_keys_ignores_other_chains_and_future_blocks() {
        let observed = vec![
            EventKey::new("sui", 5, 0),
            EventKey::new("sui", 6, 0),
            EventKey::new("other", 5, 0),
        ];
        let sealed: Vec<_> = sealed_keys("sui", 5, &observed).collect();
        assert_eq!(sealed, vec![&EventKey::new("sui", 5, 0)]);
    }
}
