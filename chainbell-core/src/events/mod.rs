//! Messages passed between pipeline workers.
//!
//! # Flow
//!
//! 1. `ChainEventSource` appends events and advances cursors in the ledger
//! 2. `Dispatcher` matches ledgered events and emits `DeliveryTask`
//! 3. `NotificationSender` delivers each `DeliveryTask`
//!
//! Tasks carry identifiers only. The sender re-reads the ledger before
//! every delivery, so a duplicated task is harmless.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, DeliveryTaskReceiver, DeliveryTaskSender, delivery_task_channel,
};
pub use types::DeliveryTask;
