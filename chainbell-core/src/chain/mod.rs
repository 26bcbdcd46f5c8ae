//! Chain event sources.
//!
//! A [`ChainClient`] opens a pull-based stream of [`StreamItem`]s starting
//! at a given block height. The stream ends when the underlying connection
//! drops; reconnecting is the caller's job.

mod sui;

pub use sui::{SuiChainClient, event_from_sui};

use crate::entities::chain_events::ChainEvent;
use crate::ledger::LedgerError;
use async_trait::async_trait;
use chainbell_sdk::client::ClientError;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// One item pulled from a chain stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Event(ChainEvent),
    /// Every event of blocks up to and including this height was delivered.
    BlockSealed(u64),
}

impl StreamItem {
    pub fn block_height(&self) -> u64 {
        match self {
            StreamItem::Event(event) => event.block_height(),
            StreamItem::BlockSealed(height) => *height,
        }
    }
}

pub type ChainStream = BoxStream<'static, Result<StreamItem, IngestError>>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("transient stream error: {0}")]
    Transient(String),

    #[error("node error: {0}")]
    Node(#[from] ClientError),

    #[error("stream closed by node")]
    StreamClosed,

    /// The stream delivered an item at or below the confirmed cursor.
    #[error("reorg detected on {chain_id}: cursor at {cursor}, observed height {observed}")]
    ReorgDetected {
        chain_id: String,
        cursor: u64,
        observed: u64,
    },

    #[error("chain {chain_id} is halted: {reason}")]
    Halted { chain_id: String, reason: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// A single item could not be decoded. The item is skipped.
    #[error("malformed item: {0}")]
    Malformed(String),
}

impl IngestError {
    /// Errors that end the chain's worker instead of triggering a reconnect.
    pub fn is_fatal(&self) -> bool {
        match self {
            IngestError::ReorgDetected { .. } | IngestError::Halted { .. } => true,
            IngestError::Ledger(e) => e.is_consistency_violation(),
            _ => false,
        }
    }
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> &str;

    /// Open a stream that starts at `from_height`.
    async fn subscribe(&self, from_height: u64) -> Result<ChainStream, IngestError>;
}
