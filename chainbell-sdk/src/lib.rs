//! Shared wire types and external-service clients for chainbell.
//!
//! The `objects` module is always available. The HTTP and WebSocket clients
//! live behind the `client` feature so crates that only need the types do
//! not pull in `reqwest` or `tokio-tungstenite`.

#![forbid(unsafe_code)]

pub mod objects;

#[cfg(feature = "client")]
pub mod client;
