//! zen-watcher: a Kubernetes-native event aggregation engine. Watches
//! Ingester CRs, runs one filter → dedup → normalize → destination pipeline
//! per ingester, and garbage-collects expired Observations.

pub mod cli;
pub mod config;
pub mod dedup;
pub mod destination;
pub mod error;
pub mod event;
pub mod filter;
pub mod fingerprint;
pub mod gc;
pub mod k8s;
pub mod leader;
pub mod normalize;
pub mod path;
pub mod pipeline;
pub mod reconciler;
pub mod sources;
pub mod telemetry;
pub mod webhook_server;

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::Error;
use crate::gc::GarbageCollector;
use crate::k8s::ClientSet;
use crate::leader::LeaderElector;
use crate::reconciler::Reconciler;
use crate::webhook_server::{self, WebhookRegistry};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Bootstraps every long-lived task (leader election, GC, reconciler,
/// webhook server, metrics exposition) and runs until a shutdown signal is
/// received, then drains with a bounded grace period (spec §4.12).
pub async fn run(config: RuntimeConfig) -> Result<(), Error> {
    let clients = ClientSet::bootstrap().await?;
    clients.check_connectivity().await?;

    let cancel = CancellationToken::new();
    let identity = pod_identity();

    let elector = LeaderElector::new(
        clients.inner(),
        config.pod_namespace.clone(),
        config.lease_name.clone(),
        identity,
    );
    let (leader_handle, leader_tx) = elector.handle();
    let leader_task = tokio::spawn(elector.run(leader_tx, cancel.clone()));

    let gc = GarbageCollector::new(clients.inner(), config.gc_interval, leader_handle.clone());
    let gc_task = tokio::spawn(gc.run(cancel.clone()));

    let webhook_registry = WebhookRegistry::new();
    let reconciler = Reconciler::new(
        clients.inner(),
        webhook_registry.clone(),
        leader_handle.clone(),
        config.reconcile_drain_timeout,
    );
    let reconciler_task = tokio::spawn(reconciler.run(cancel.clone()));

    let server_config = webhook_server::ServerConfig {
        bind_addr: config.webhook_bind_addr,
        max_body_bytes: config.server_max_request_bytes,
        rate_limit_per_min: config.webhook_rate_limit_per_min,
        trusted_proxies: config.trusted_proxy_cidrs.clone(),
    };
    let server_task = {
        let client = clients.inner();
        let leader_handle = leader_handle.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = webhook_server::serve(server_config, webhook_registry, client, leader_handle, cancel).await {
                warn!(error = %e, "webhook server exited with error");
            }
        })
    };

    let metrics_task = tokio::spawn(telemetry::serve_metrics(config.metrics_bind_addr, cancel.clone()));

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    cancel.cancel();

    let drain = futures::future::join_all(vec![leader_task, gc_task, reconciler_task, server_task, metrics_task]);
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
        warn!("shutdown grace period elapsed before all tasks finished");
    }

    Ok(())
}

fn pod_identity() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
