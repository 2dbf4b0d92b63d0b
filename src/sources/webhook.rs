//! Webhook adapter (spec §4.6): registers a push route on the shared
//! webhook server (C11) for the duration of this adapter's lifetime.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::Error;
use crate::event::RawEvent;
use crate::k8s::ingester::WebhookConfig;
use crate::sources::{AdapterStatus, SourceAdapter, StatusCell};
use crate::webhook_server::{WebhookRegistry, WebhookRoute};

pub struct WebhookAdapter {
    source: String,
    namespace: String,
    config: WebhookConfig,
    registry: WebhookRegistry,
    status: Arc<StatusCell>,
}

impl WebhookAdapter {
    pub fn new(source: String, namespace: String, config: WebhookConfig, registry: WebhookRegistry) -> Self {
        Self {
            source,
            namespace,
            config,
            registry,
            status: Arc::new(StatusCell::new()),
        }
    }
}

#[async_trait]
impl SourceAdapter for WebhookAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    /// Registers the route and waits for `cancel`; the actual per-request
    /// parsing, auth, and rate-limiting happen in
    /// `crate::webhook_server`'s single catch-all handler, since that
    /// handler is the only place with access to the live HTTP request. This
    /// adapter's `start` therefore runs on every replica (spec §4.10:
    /// webhook handlers are never leader-gated), unlike the informer and
    /// logs adapters.
    async fn start(&self, tx: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), Error> {
        let route = WebhookRoute {
            source: self.source.clone(),
            namespace: self.namespace.clone(),
            auth: self.config.authentication.clone(),
            tx,
            status: self.status.clone(),
        };
        self.registry.register(self.config.path.clone(), route);
        info!(source = %self.source, path = %self.config.path, "registered webhook route");

        cancel.cancelled().await;

        self.registry.unregister(&self.config.path);
        info!(source = %self.source, path = %self.config.path, "unregistered webhook route");
        Ok(())
    }
}
