// Telemetry module: structured logging and Prometheus metrics

use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize structured logging with JSON formatting.
///
/// Log level comes from `RUST_LOG` when set, otherwise from configuration.
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_target(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus metrics exporter and register metric descriptions.
pub fn init_metrics(port: u16) -> Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_metrics();

    tracing::info!(port = port, "Prometheus metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "updater_entities_evaluated_total",
        "Entities evaluated by the lifecycle updater, labeled by entity type"
    );
    describe_counter!(
        "updater_items_dispatched_total",
        "Dispatch items published to the task queue"
    );
    describe_counter!(
        "updater_deletes_issued_total",
        "Delete items issued for entities whose leases all expired"
    );
    describe_counter!(
        "updater_dispatch_errors_total",
        "Dispatch items that failed to publish after retries"
    );
    describe_gauge!(
        "updater_watermark_lag_seconds",
        "Age of the cross-cycle watermark relative to the current cycle start"
    );
    describe_histogram!(
        "updater_cycle_duration_seconds",
        "Wall-clock duration of one full update cycle"
    );
}
