//! Observability (C13, ambient stack): `tracing` subscriber install and
//! Prometheus metrics exposition. Carried regardless of spec §1's framing of
//! "Prometheus metric exposition" and "structured logging" as external
//! collaborators — that framing scopes out their *design*, not the need to
//! wire the teacher's own logging/metrics crates into every component.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber: JSON-formatted, filtered by
/// `RUST_LOG` (default `info`). Must run before anything else logs.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().with_target(true).init();
}

/// Installs the global Prometheus recorder and serves `/metrics` on `addr`
/// until `cancel` fires.
///
/// `metrics-exporter-prometheus`'s bundled HTTP listener (the
/// `http-listener` feature) has no graceful-shutdown hook in this version;
/// this task simply outlives `cancel` and the listener goes down with the
/// process, same as the metrics server in every example operator in the
/// pack.
pub async fn serve_metrics(addr: SocketAddr, cancel: CancellationToken) {
    describe_metrics();
    if let Err(e) = PrometheusBuilder::new().with_http_listener(addr).install() {
        error!(error = %e, "failed to install prometheus metrics exporter");
        return;
    }
    cancel.cancelled().await;
}

fn describe_metrics() {
    describe_counter!(
        "zen_watcher_events_received_total",
        "Raw events received by a pipeline, before filter or dedup."
    );
    describe_counter!("zen_watcher_events_filtered_total", "Events dropped by the filter stage.");
    describe_counter!("zen_watcher_events_deduplicated_total", "Events dropped as duplicates.");
    describe_counter!("zen_watcher_normalize_total", "Events successfully normalized into an Observation spec.");
    describe_counter!(
        "zen_watcher_destination_writes_total",
        "Destination write attempts, labeled by outcome."
    );
    describe_histogram!(
        "zen_watcher_destination_write_duration_seconds",
        "Destination write latency in seconds."
    );
    describe_counter!(
        "zen_watcher_ttl_clamped_total",
        "TTL values clamped to the allowed range, labeled by origin."
    );
    describe_counter!("zen_watcher_gc_scanned_total", "Observations scanned by the garbage collector.");
    describe_counter!("zen_watcher_gc_deleted_total", "Observations deleted by the garbage collector.");
    describe_counter!("zen_watcher_gc_errors_total", "Garbage collector errors.");
    describe_counter!(
        "zen_watcher_ingesters_config_errors_total",
        "Ingester configuration errors, labeled by source and reason."
    );
    describe_counter!("zen_watcher_filter_errors_total", "Filter expression evaluation failures.");
    describe_counter!("zen_watcher_adapter_events_total", "Raw events emitted by a source adapter.");
    describe_counter!("zen_watcher_adapter_errors_total", "Source adapter errors, labeled by kind.");
}
