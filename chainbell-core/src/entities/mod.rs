pub mod chain_events;
pub mod cursors;
pub mod delivery_status;
pub mod subscriptions;

use chainbell_sdk::objects::EventKind as SdkEventKind;
use serde::{Deserialize, Serialize};

/// Identity of a notification recipient: a Telegram chat id (`-100…`) or a
/// public `@channel` name.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct RecipientId(pub String);

impl RecipientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event kind for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `chainbell_sdk::objects::EventKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "event_kind")]
pub enum EventKind {
    Buy,
    Other,
}

impl From<EventKind> for SdkEventKind {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::Buy => SdkEventKind::Buy,
            EventKind::Other => SdkEventKind::Other,
        }
    }
}

impl From<SdkEventKind> for EventKind {
    fn from(value: SdkEventKind) -> Self {
        match value {
            SdkEventKind::Buy => EventKind::Buy,
            SdkEventKind::Other => EventKind::Other,
        }
    }
}

/// Delivery state of one (event, recipient) pair.
///
/// Transitions only move forward: `Pending` → `Dispatched` →
/// `Delivered` | `FailedPermanent`. Both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case", type_name = "processing_status")]
pub enum ProcessingStatus {
    Pending,
    Dispatched,
    Delivered,
    FailedPermanent,
}

impl ProcessingStatus {
    fn rank(self) -> u8 {
        match self {
            ProcessingStatus::Pending => 0,
            ProcessingStatus::Dispatched => 1,
            ProcessingStatus::Delivered | ProcessingStatus::FailedPermanent => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::Delivered | ProcessingStatus::FailedPermanent
        )
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(self, next: ProcessingStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// States from which `self` may be entered.
    pub fn predecessors(self) -> &'static [ProcessingStatus] {
        match self {
            ProcessingStatus::Pending => &[],
            ProcessingStatus::Dispatched => &[ProcessingStatus::Pending],
            ProcessingStatus::Delivered | ProcessingStatus::FailedPermanent => {
                &[ProcessingStatus::Pending, ProcessingStatus::Dispatched]
            }
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Dispatched => "dispatched",
            ProcessingStatus::Delivered => "delivered",
            ProcessingStatus::FailedPermanent => "failed_permanent",
        };
        f.write_str(s)
    }
}
