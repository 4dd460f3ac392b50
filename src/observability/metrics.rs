//! Metrics collection and exposition.
//!
//! # Metrics
//! - `live_config_store_connects_total` (counter): connection attempts by outcome
//! - `live_config_key_reads_total` (counter): point reads by outcome
//! - `live_config_loads_total` (counter): bulk loads by source and outcome
//! - `live_config_keys_loaded` (gauge): resolved keys after the last bulk load
//! - `live_config_watch_events_total` (counter): routed watch events by outcome
//! - `live_config_watch_restarts_total` (counter): liveness restarts by outcome
//! - `live_config_coercion_failures_total` (counter): rejected values by logical name
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed recorder it is a no-op
//! - The Prometheus exporter is only installed by the binary

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder with an HTTP scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_connect(outcome: &'static str) {
    counter!("live_config_store_connects_total", "outcome" => outcome).increment(1);
}

pub fn record_key_read(outcome: &'static str) {
    counter!("live_config_key_reads_total", "outcome" => outcome).increment(1);
}

pub fn record_load(source: &'static str, success: bool, loaded: usize) {
    let outcome = if success { "success" } else { "partial" };
    counter!("live_config_loads_total", "source" => source, "outcome" => outcome).increment(1);
    gauge!("live_config_keys_loaded").set(loaded as f64);
}

pub fn record_watch_event(outcome: &'static str) {
    counter!("live_config_watch_events_total", "outcome" => outcome).increment(1);
}

pub fn record_watch_restart(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("live_config_watch_restarts_total", "outcome" => outcome).increment(1);
}

pub fn record_coercion_failure(name: &str) {
    counter!("live_config_coercion_failures_total", "name" => name.to_string()).increment(1);
}
