//! Fixtures shared by the unit tests: event builders, a scripted bot
//! transport and a scripted chain client.

use crate::chain::{ChainClient, ChainStream, IngestError, StreamItem};
use crate::entities::RecipientId;
use crate::entities::chain_events::{BuyFields, ChainEvent, EventKey, EventPayload};
use crate::registry::SubscriptionMatch;
use crate::rendering::{Alert, AlertButton};
use crate::transport::{BotTransport, DeliveryError};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub fn buy_event(chain_id: &str, height: u64, log_index: u32, amount: &str) -> ChainEvent {
    let at = time::OffsetDateTime::UNIX_EPOCH;
    ChainEvent {
        key: EventKey::new(chain_id, height, log_index),
        emitted_at: at,
        payload: EventPayload::Buy(BuyFields {
            package: "0x7b88".to_string(),
            token: "0xcafe::moon::MOON".to_string(),
            buyer: "0x123456789abcdef".to_string(),
            amount: Decimal::from_str(amount).unwrap(),
            token_amount: Decimal::from(1_000),
            tx_digest: format!("tx-{height}-{log_index}"),
        }),
        observed_at: at,
    }
}

pub fn sub_match(recipient: &str, subscription: u128) -> SubscriptionMatch {
    SubscriptionMatch {
        recipient_id: RecipientId::new(recipient),
        subscription_id: Uuid::from_u128(subscription),
    }
}

/// One call made to a [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: RecipientId,
    pub text: String,
    pub photo: Option<String>,
    pub buttons: Vec<AlertButton>,
}

/// Bot transport that answers from a per-recipient script and records
/// every call. Recipients without a scripted answer succeed.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<HashMap<RecipientId, VecDeque<Result<(), DeliveryError>>>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the answers for the next calls to `recipient`.
    pub fn script(&self, recipient: &str, answers: Vec<Result<(), DeliveryError>>) {
        self.script
            .lock()
            .unwrap()
            .entry(RecipientId::new(recipient))
            .or_default()
            .extend(answers);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn calls_to(&self, recipient: &str) -> usize {
        self.sent()
            .iter()
            .filter(|m| m.recipient.as_str() == recipient)
            .count()
    }
}

#[async_trait]
impl BotTransport for ScriptedTransport {
    async fn send(&self, recipient: &RecipientId, alert: &Alert) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(SentMessage {
            recipient: recipient.clone(),
            text: alert.text.clone(),
            photo: alert.photo.clone(),
            buttons: alert.buttons.clone(),
        });
        self.script
            .lock()
            .unwrap()
            .get_mut(recipient)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(()))
    }
}

pub type Session = Vec<Result<StreamItem, IngestError>>;

/// Chain client that plays back one scripted session per `subscribe`
/// call. Once the sessions run out, streams stay open and silent.
#[derive(Debug)]
pub struct ScriptedChainClient {
    chain_id: String,
    sessions: Mutex<VecDeque<Session>>,
    subscriptions: Arc<Mutex<Vec<u64>>>,
}

impl ScriptedChainClient {
    pub fn new(chain_id: &str, sessions: Vec<Session>) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            sessions: Mutex::new(sessions.into()),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Heights passed to `subscribe`, in call order.
    pub fn subscriptions(&self) -> Arc<Mutex<Vec<u64>>> {
        Arc::clone(&self.subscriptions)
    }
}

#[async_trait]
impl ChainClient for ScriptedChainClient {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    async fn subscribe(&self, from_height: u64) -> Result<ChainStream, IngestError> {
        self.subscriptions.lock().unwrap().push(from_height);
        match self.sessions.lock().unwrap().pop_front() {
            Some(items) => Ok(stream::iter(items).boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}
