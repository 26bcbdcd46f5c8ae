#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
pub mod entities;
pub mod events;
pub mod framework;
pub mod ledger;
pub mod metrics;
pub mod processors;
pub mod registry;
pub mod rendering;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;
