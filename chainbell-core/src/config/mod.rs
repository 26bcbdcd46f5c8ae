//! Runtime configuration shared by the pipeline workers.
//!
//! These are validated values; parsing the TOML file and environment is the
//! server crate's job.

mod config_store;
mod pipeline;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use pipeline::{ChainConfig, DeliveryConfig, DispatchConfig, IngestConfig};
