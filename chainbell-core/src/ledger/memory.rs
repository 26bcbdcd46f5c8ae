use super::{ConsistencyViolation, Ledger, LedgerError, check_cursor_move, sealed_keys};
use crate::entities::chain_events::{ChainEvent, EventKey};
use crate::entities::cursors::ChainCursor;
use crate::entities::delivery_status::DeliveryPair;
use crate::entities::{ProcessingStatus, RecipientId};
use crate::registry::SubscriptionMatch;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

#[derive(Debug)]
struct StoredEvent {
    event: ChainEvent,
    matched: bool,
}

#[derive(Debug, Default)]
struct State {
    events: BTreeMap<EventKey, StoredEvent>,
    pairs: BTreeMap<(EventKey, RecipientId), DeliveryPair>,
    cursors: HashMap<String, ChainCursor>,
}

impl State {
    fn pair_mut(
        &mut self,
        key: &EventKey,
        recipient_id: &RecipientId,
    ) -> Result<&mut DeliveryPair, LedgerError> {
        self.pairs
            .get_mut(&(key.clone(), recipient_id.clone()))
            .ok_or_else(|| LedgerError::PairNotFound {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
            })
    }

    fn pairs_in(&self, status: ProcessingStatus) -> impl Iterator<Item = &DeliveryPair> {
        self.pairs.values().filter(move |p| p.status == status)
    }
}

/// In-process [`Ledger`]. Every operation holds one lock, which gives it
/// the same all-or-nothing behaviour as a database transaction.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<State>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledgered events across all chains.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }

    /// Every pair, oldest event first.
    pub async fn pairs(&self) -> Vec<DeliveryPair> {
        self.state.lock().await.pairs.values().cloned().collect()
    }
}

fn now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn append(&self, event: ChainEvent) -> Result<bool, LedgerError> {
        let mut state = self.state.lock().await;
        if state.events.contains_key(&event.key) {
            return Ok(false);
        }
        state.events.insert(
            event.key.clone(),
            StoredEvent {
                event,
                matched: false,
            },
        );
        Ok(true)
    }

    async fn advance_cursor(
        &self,
        chain_id: &str,
        height: u64,
        observed: &[EventKey],
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        check_cursor_move(chain_id, state.cursors.get(chain_id), height)?;

        let missing: Vec<EventKey> = sealed_keys(chain_id, height, observed)
            .filter(|k| !state.events.contains_key(*k))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ConsistencyViolation::MissingEvents {
                chain_id: chain_id.to_string(),
                height,
                missing,
            }
            .into());
        }

        let cursor = state
            .cursors
            .entry(chain_id.to_string())
            .or_insert_with(|| ChainCursor {
                chain_id: chain_id.to_string(),
                last_confirmed_height: height,
                halted_reason: None,
                updated_at: now(),
            });
        if cursor.last_confirmed_height < height {
            cursor.last_confirmed_height = height;
            cursor.updated_at = now();
        }
        Ok(())
    }

    async fn cursor(&self, chain_id: &str) -> Result<Option<ChainCursor>, LedgerError> {
        Ok(self.state.lock().await.cursors.get(chain_id).cloned())
    }

    async fn halt_chain(&self, chain_id: &str, reason: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let cursor = state
            .cursors
            .entry(chain_id.to_string())
            .or_insert_with(|| ChainCursor {
                chain_id: chain_id.to_string(),
                last_confirmed_height: 0,
                halted_reason: None,
                updated_at: now(),
            });
        cursor.halted_reason = Some(reason.to_string());
        cursor.updated_at = now();
        Ok(())
    }

    async fn list_unmatched(&self, limit: usize) -> Result<Vec<ChainEvent>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .values()
            .filter(|stored| !stored.matched)
            .take(limit)
            .map(|stored| stored.event.clone())
            .collect())
    }

    async fn record_matches(
        &self,
        key: &EventKey,
        matches: &[SubscriptionMatch],
    ) -> Result<usize, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.events.contains_key(key) {
            return Err(LedgerError::EventNotFound(key.clone()));
        }
        let mut created = 0;
        for m in matches {
            let pair_key = (key.clone(), m.recipient_id.clone());
            if state.pairs.contains_key(&pair_key) {
                continue;
            }
            state.pairs.insert(
                pair_key,
                DeliveryPair {
                    key: key.clone(),
                    recipient_id: m.recipient_id.clone(),
                    subscription_id: Some(m.subscription_id),
                    status: ProcessingStatus::Pending,
                    attempts: 0,
                    last_error: None,
                    updated_at: now(),
                },
            );
            created += 1;
        }
        if let Some(stored) = state.events.get_mut(key) {
            stored.matched = true;
        }
        Ok(created)
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<DeliveryPair>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pairs_in(ProcessingStatus::Pending)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_in_flight(&self) -> Result<Vec<DeliveryPair>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.pairs_in(ProcessingStatus::Dispatched).cloned().collect())
    }

    async fn mark_status(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        status: ProcessingStatus,
    ) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let pair = state.pair_mut(key, recipient_id)?;
        if !pair.status.can_transition_to(status) {
            return Err(ConsistencyViolation::StatusRegression {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
                from: pair.status,
                to: status,
            }
            .into());
        }
        pair.status = status;
        pair.updated_at = now();
        Ok(())
    }

    async fn record_attempt(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
        error: &str,
    ) -> Result<u32, LedgerError> {
        let mut state = self.state.lock().await;
        let pair = state.pair_mut(key, recipient_id)?;
        if pair.status.is_terminal() {
            return Err(ConsistencyViolation::TerminalPair {
                key: key.clone(),
                recipient_id: recipient_id.clone(),
                status: pair.status,
            }
            .into());
        }
        pair.attempts += 1;
        pair.last_error = Some(error.to_string());
        pair.updated_at = now();
        Ok(pair.attempts)
    }

    async fn pair(
        &self,
        key: &EventKey,
        recipient_id: &RecipientId,
    ) -> Result<Option<DeliveryPair>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pairs
            .get(&(key.clone(), recipient_id.clone()))
            .cloned())
    }

    async fn event(&self, key: &EventKey) -> Result<Option<ChainEvent>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state.events.get(key).map(|stored| stored.event.clone()))
    }

    async fn backlog_depth(&self) -> Result<u64, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .pairs
            .values()
            .filter(|p| !p.status.is_terminal())
            .count() as u64)
    }
}
