//! Outbound bot transports.

mod telegram;

pub use telegram::{TelegramTransport, classify_client_error};

use crate::entities::RecipientId;
use crate::rendering::Alert;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying later. `retry_after` is the server's requested wait.
    #[error("transient delivery failure: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    /// Retrying will not help (bad chat id, bot removed, …).
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn transient(reason: impl Into<String>) -> Self {
        DeliveryError::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

#[async_trait]
pub trait BotTransport: Send + Sync {
    /// Send a rendered alert to `recipient`.
    async fn send(&self, recipient: &RecipientId, alert: &Alert) -> Result<(), DeliveryError>;
}
