//! Bounded channel between the dispatcher and the notification sender.

use super::types::DeliveryTask;
use tokio::sync::mpsc;

/// Default capacity of the dispatch queue.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type DeliveryTaskSender = mpsc::Sender<DeliveryTask>;
pub type DeliveryTaskReceiver = mpsc::Receiver<DeliveryTask>;

/// Create the dispatch queue. A zero capacity falls back to the default.
pub fn delivery_task_channel(capacity: usize) -> (DeliveryTaskSender, DeliveryTaskReceiver) {
    let capacity = if capacity == 0 {
        DEFAULT_CHANNEL_BUFFER
    } else {
        capacity
    };
    mpsc::channel(capacity)
}
