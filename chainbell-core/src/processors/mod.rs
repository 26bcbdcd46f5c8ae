//! Pipeline processors.
//!
//! - `ChainEventSource`: Reads one chain's event stream, ledgers events and
//!   advances the chain cursor
//! - `Dispatcher`: Matches ledgered events to subscriptions, emits
//!   `DeliveryTask`s
//! - `NotificationSender`: Receives `DeliveryTask`s, delivers them through
//!   the bot transport

pub mod chain_source;
pub mod dispatcher;
pub mod notification_sender;

pub use chain_source::ChainEventSource;
pub use dispatcher::{DispatchError, Dispatcher, TickSummary};
pub use notification_sender::{DeliveryOutcome, NotificationSender};
