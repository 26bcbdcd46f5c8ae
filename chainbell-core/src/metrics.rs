//! Prometheus metrics for the pipeline.
//!
//! All metrics live in one process-wide [`REGISTRY`], exposed by the server
//! on `GET /metrics`. Per-event metrics carry a `chain_id` label.

#![allow(clippy::expect_used)]

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

fn chain_counter(name: &str, help: &str) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), &["chain_id"])
        .expect("metric options are valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("metric is registered once");
    counter
}

lazy_static! {
    /// Global Prometheus registry.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Events appended to the ledger for the first time.
    pub static ref EVENTS_INGESTED: IntCounterVec =
        chain_counter("chainbell_events_ingested_total", "Chain events appended to the ledger");

    /// Events the stream delivered again after they were already ledgered.
    pub static ref EVENTS_DUPLICATE: IntCounterVec =
        chain_counter("chainbell_events_duplicate_total", "Duplicate chain events ignored");

    pub static ref NOTIFICATIONS_DISPATCHED: IntCounterVec = chain_counter(
        "chainbell_notifications_dispatched_total",
        "Delivery tasks handed to the sender"
    );

    pub static ref NOTIFICATIONS_DELIVERED: IntCounterVec = chain_counter(
        "chainbell_notifications_delivered_total",
        "Notifications accepted by the bot transport"
    );

    /// Incremented exactly once per pair that ends in `failed_permanent`.
    pub static ref NOTIFICATIONS_FAILED_PERMANENT: IntCounterVec = chain_counter(
        "chainbell_notifications_failed_permanent_total",
        "Notifications given up on"
    );

    pub static ref DELIVERY_ATTEMPTS: IntCounterVec = chain_counter(
        "chainbell_delivery_attempts_total",
        "Calls made to the bot transport"
    );

    pub static ref STREAM_RECONNECTS: IntCounterVec =
        chain_counter("chainbell_stream_reconnects_total", "Node stream reconnects");

    pub static ref REORGS_DETECTED: IntCounterVec =
        chain_counter("chainbell_reorgs_detected_total", "Reorgs that halted a chain");

    /// Delivery pairs not yet in a terminal state.
    pub static ref LEDGER_BACKLOG: IntGauge = {
        let gauge = IntGauge::new("chainbell_ledger_backlog", "Undelivered notification pairs")
            .expect("metric options are valid");
        REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("metric is registered once");
        gauge
    };

    /// Highest height seen on the stream minus the last confirmed height.
    pub static ref STREAM_LAG_BLOCKS: IntGaugeVec = {
        let gauge = IntGaugeVec::new(
            Opts::new(
                "chainbell_stream_lag_blocks",
                "Blocks observed on the stream but not yet confirmed",
            ),
            &["chain_id"],
        )
        .expect("metric options are valid");
        REGISTRY
            .register(Box::new(gauge.clone()))
            .expect("metric is registered once");
        gauge
    };
}

/// Gather all metrics in the Prometheus text format.
pub fn gather_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_includes_labelled_counters() {
        EVENTS_INGESTED.with_label_values(&["metrics-test"]).inc();
        LEDGER_BACKLOG.set(3);
        let text = String::from_utf8(gather_metrics().unwrap()).unwrap();
        assert!(text.contains("chainbell_events_ingested_total{chain_id=\"metrics-test\"} 1"));
        assert!(text.contains("chainbell_ledger_backlog"));
    }
}
