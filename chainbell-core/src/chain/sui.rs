use super::{ChainClient, ChainStream, IngestError, StreamItem};
use crate::entities::chain_events::{BuyFields, ChainEvent, EventKey, EventPayload, OtherFields};
use async_trait::async_trait;
use chainbell_sdk::client::{NodeStream, NodeStreamClient};
use chainbell_sdk::objects::{NodeNotification, SuiEvent};
use futures_util::StreamExt;
use futures_util::stream;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Substrings of a Move event type that mark it as a buy.
const BUY_EVENT_MARKERS: [&str; 3] = ["Minted", "Purchased", "Swap"];

/// MIST per SUI.
const MIST_PER_SUI: u64 = 1_000_000_000;

/// Checkpoints whose event identities are remembered for deduplication.
const REMEMBERED_CHECKPOINTS: usize = 64;

/// [`ChainClient`] for a Sui full node.
///
/// Block height is the checkpoint sequence number. Sui has no per-checkpoint
/// event index, so each distinct event (`txDigest`, `eventSeq`) gets a running
/// index within its checkpoint in first-seen order. A repeated notification
/// maps back to the index it got the first time. A resumed stream restarts at
/// a checkpoint boundary and replays in the same order, so indexes are stable
/// across reconnects.
#[derive(Debug, Clone)]
pub struct SuiChainClient {
    chain_id: String,
    client: NodeStreamClient,
}

impl SuiChainClient {
    pub fn new(chain_id: impl Into<String>, client: NodeStreamClient) -> Self {
        Self {
            chain_id: chain_id.into(),
            client,
        }
    }
}

#[derive(Debug, Default)]
struct CheckpointIndex {
    next: u32,
    assigned: HashMap<(String, String), u32>,
}

/// Assigns ledger keys to the notifications of one stream.
#[derive(Debug)]
struct SuiEventIndexer {
    chain_id: String,
    checkpoints: BTreeMap<u64, CheckpointIndex>,
}

impl SuiEventIndexer {
    fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            checkpoints: BTreeMap::new(),
        }
    }

    fn log_index(&mut self, checkpoint: u64, event: &SuiEvent) -> u32 {
        let index = self.checkpoints.entry(checkpoint).or_default();
        let id = (event.id.tx_digest.clone(), event.id.event_seq.clone());
        let log_index = match index.assigned.get(&id) {
            Some(log_index) => *log_index,
            None => {
                let log_index = index.next;
                index.next = index.next.saturating_add(1);
                index.assigned.insert(id, log_index);
                log_index
            }
        };
        while self.checkpoints.len() > REMEMBERED_CHECKPOINTS {
            self.checkpoints.pop_first();
        }
        log_index
    }

    fn convert(&mut self, notification: NodeNotification) -> Result<StreamItem, IngestError> {
        match notification {
            NodeNotification::Checkpoint(summary) => parse_u64(&summary.sequence_number)
                .map(StreamItem::BlockSealed)
                .ok_or_else(|| {
                    IngestError::Malformed(format!(
                        "checkpoint sequence number {:?}",
                        summary.sequence_number
                    ))
                }),
            NodeNotification::Event(event) => {
                let checkpoint = event
                    .checkpoint
                    .as_deref()
                    .and_then(parse_u64)
                    .ok_or_else(|| {
                        IngestError::Malformed(format!(
                            "event {}:{} has no checkpoint",
                            event.id.tx_digest, event.id.event_seq
                        ))
                    })?;
                let log_index = self.log_index(checkpoint, &event);
                let observed_at = time::OffsetDateTime::now_utc();
                Ok(StreamItem::Event(event_from_sui(
                    &self.chain_id,
                    checkpoint,
                    log_index,
                    event,
                    observed_at,
                )))
            }
        }
    }
}

struct SuiStreamState {
    stream: NodeStream,
    indexer: SuiEventIndexer,
}

#[async_trait]
impl ChainClient for SuiChainClient {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn subscribe(&self, from_height: u64) -> Result<ChainStream, IngestError> {
        let node_stream = self.client.subscribe(from_height).await?;
        let state = SuiStreamState {
            stream: node_stream,
            indexer: SuiEventIndexer::new(self.chain_id.clone()),
        };
        let items = stream::unfold(state, |mut state| async move {
            let item = match state.stream.next_notification().await? {
                Ok(notification) => state.indexer.convert(notification),
                Err(e) => Err(IngestError::Node(e)),
            };
            Some((item, state))
        });
        Ok(items.boxed())
    }
}

/// Decode a Sui event into a ledger event at `(checkpoint, log_index)`.
pub fn event_from_sui(
    chain_id: &str,
    checkpoint: u64,
    log_index: u32,
    event: SuiEvent,
    observed_at: time::OffsetDateTime,
) -> ChainEvent {
    let emitted_at = event
        .timestamp_ms
        .as_deref()
        .and_then(|ms| i128::from_str(ms).ok())
        .and_then(|ms| time::OffsetDateTime::from_unix_timestamp_nanos(ms * 1_000_000).ok())
        .unwrap_or(observed_at);

    let payload = if BUY_EVENT_MARKERS
        .iter()
        .any(|marker| event.event_type.contains(marker))
    {
        buy_payload(event)
    } else {
        EventPayload::Other(OtherFields {
            package: event.package_id,
            event_type: event.event_type,
            tx_digest: event.id.tx_digest,
            fields: event.parsed_json,
        })
    };

    ChainEvent {
        key: EventKey::new(chain_id, checkpoint, log_index),
        emitted_at,
        payload,
        observed_at,
    }
}

fn buy_payload(event: SuiEvent) -> EventPayload {
    let fields = &event.parsed_json;
    let buyer = first_str(fields, &["buyer", "recipient", "user"])
        .unwrap_or(event.sender.as_str())
        .to_string();
    let token = first_str(fields, &["token", "token_id"])
        .unwrap_or(event.package_id.as_str())
        .to_string();
    let amount = decimal_field(fields, "amount")
        .checked_div(Decimal::from(MIST_PER_SUI))
        .unwrap_or_default()
        .normalize();
    let token_amount = decimal_field(fields, "token_amount");

    EventPayload::Buy(BuyFields {
        package: event.package_id,
        token,
        buyer,
        amount,
        token_amount,
        tx_digest: event.id.tx_digest,
    })
}

fn first_str<'a>(fields: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| fields.get(name).and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Numeric Move fields arrive as JSON strings (u64 and wider) or numbers.
fn decimal_field(fields: &Value, name: &str) -> Decimal {
    match fields.get(name) {
        Some(Value::String(s)) => Decimal::from_str(s).unwrap_or_default(),
        Some(Value::Number(n)) => Decimal::from_str(&n.to_string()).unwrap_or_default(),
        _ => Decimal::ZERO,
    }
}

fn parse_u64(s: &str) -> Option<u64> {
    s.parse().ok()
}
