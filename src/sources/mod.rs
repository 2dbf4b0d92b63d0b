//! Source adapters (C6, spec §4.6): informer, webhook, and logs, each
//! translating its producer's native shape into a [`RawEvent`](crate::event::RawEvent).
//!
//! Polymorphism here follows spec §9's guidance ("a tagged variant or an
//! interface with three methods; do not attempt deep inheritance"): one
//! trait, three independent implementors, no shared base beyond it.

pub mod informer;
pub mod logs;
pub mod webhook;

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::event::RawEvent;

pub use informer::InformerAdapter;
pub use logs::LogsAdapter;
pub use webhook::WebhookAdapter;

/// A point-in-time health snapshot for one running adapter, read by the
/// reconciler for Ingester status writes and by `/readyz`.
#[derive(Debug, Clone, Default)]
pub struct AdapterStatus {
    pub last_event_at: Option<DateTime<Utc>>,
    pub error_count: u64,
    pub healthy: bool,
}

/// Shared, lock-protected status cell an adapter updates as it runs and
/// [`SourceAdapter::status`] reads back. Plain `Mutex`, not `DashMap`: one
/// adapter owns exactly one cell, there is no concurrent-key contention to
/// shard over.
#[derive(Default)]
pub struct StatusCell(Mutex<AdapterStatus>);

impl StatusCell {
    pub fn new() -> Self {
        Self(Mutex::new(AdapterStatus {
            healthy: true,
            ..Default::default()
        }))
    }

    pub fn record_event(&self) {
        let mut guard = self.0.lock().unwrap();
        guard.last_event_at = Some(Utc::now());
        guard.healthy = true;
    }

    pub fn record_error(&self) {
        let mut guard = self.0.lock().unwrap();
        guard.error_count += 1;
    }

    pub fn mark_unhealthy(&self) {
        self.0.lock().unwrap().healthy = false;
    }

    pub fn snapshot(&self) -> AdapterStatus {
        self.0.lock().unwrap().clone()
    }
}

/// The three adapter kinds' common capability set: `start`, implicit
/// `stop` via the `cancel` token every suspension point selects on (per
/// spec §9's "cancellation threads through every suspension"), and
/// `status`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// The ingester `source` label this adapter instance serves, used in
    /// every log line and metric it emits.
    fn source(&self) -> &str;

    /// Runs until `cancel` fires, emitting raw events into `tx`. Returns
    /// `Ok(())` on a clean cancellation-driven stop; an `Err` return means
    /// the adapter gave up permanently (e.g. GVR could not be resolved) and
    /// the reconciler should surface a `Failed` condition rather than retry.
    async fn start(&self, tx: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), Error>;

    fn status(&self) -> AdapterStatus;
}

/// Sends `raw` to the pipeline's intake channel, applying the backpressure
/// policy spec §4.6 assigns to push-style adapters: block (informer, logs)
/// since the producer-side buffer (Kubernetes watch queue, pod log stream)
/// absorbs the wait. Webhook has its own non-blocking `try_send` path in
/// [`webhook`] since it must answer the HTTP request rather than block it.
pub async fn emit_blocking(tx: &mpsc::Sender<RawEvent>, raw: RawEvent) -> bool {
    tx.send(raw).await.is_ok()
}
