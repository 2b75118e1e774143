// src/observability.rs
//! Logging and metrics setup
//!
//! The library only emits through the `tracing` and `metrics` facades.
//! Binaries call [`init_tracing`] and, optionally, [`init_metrics`].

use crate::utils::errors::{RecorderError, Result};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Metric names emitted by the recorder
pub mod metrics_names {
    pub const MESSAGES_TOTAL: &str = "recorder_messages_total";
    pub const FLUSHES_TOTAL: &str = "recorder_flushes_total";
    pub const ROWS_COMMITTED_TOTAL: &str = "recorder_rows_committed_total";
    pub const FLUSH_FAILURES_TOTAL: &str = "recorder_flush_failures_total";
    pub const FLUSH_DURATION_SECONDS: &str = "recorder_flush_duration_seconds";
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`)
pub fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| RecorderError::Config(format!("Failed to init tracing: {}", e)))
}

/// Serve Prometheus metrics on `addr`
pub fn init_metrics(addr: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| RecorderError::Config(format!("Failed to install metrics exporter: {}", e)))?;

    describe_metrics();
    info!("Serving metrics on http://{}/metrics", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        metrics_names::MESSAGES_TOTAL,
        "Messages taken off the recorder channel"
    );
    describe_counter!(metrics_names::FLUSHES_TOTAL, "Flushes that reached the container");
    describe_counter!(
        metrics_names::ROWS_COMMITTED_TOTAL,
        "Rows durably written, per table"
    );
    describe_counter!(
        metrics_names::FLUSH_FAILURES_TOTAL,
        "Failed flushes and rejected table batches"
    );
    describe_histogram!(
        metrics_names::FLUSH_DURATION_SECONDS,
        Unit::Seconds,
        "Wall time of one flush"
    );
}
