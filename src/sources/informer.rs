//! Informer adapter (spec §4.6): watches a single user-declared GVR via
//! `kube::runtime::watcher`, grounded on the `kube`-based operators in the
//! example pack (not the teacher's own pre-`kube`-crate `lib/k8s-runtime`,
//! since the teacher's root `Cargo.toml` itself has since moved to `kube`).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::core::{ApiResource, GroupVersionKind};
use kube::runtime::watcher::{self, Event};
use kube::Client;
use metrics::counter;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Error;
use crate::event::{EventHint, RawEvent};
use crate::k8s::ingester::InformerConfig;
use crate::k8s::observation::ResourceRef;
use crate::sources::{AdapterStatus, SourceAdapter, StatusCell};

const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const DEFAULT_RESYNC: Duration = Duration::from_secs(600);

pub struct InformerAdapter {
    source: String,
    config: InformerConfig,
    client: Client,
    status: StatusCell,
}

impl InformerAdapter {
    pub fn new(source: String, config: InformerConfig, client: Client) -> Self {
        Self {
            source,
            config,
            client,
            status: StatusCell::new(),
        }
    }

    fn api(&self) -> (Api<DynamicObject>, ApiResource) {
        let gvk = GroupVersionKind {
            group: self.config.group.clone(),
            version: self.config.version.clone(),
            kind: crate::k8s::gvr_to_kind(&self.config.resource),
        };
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &self.config.resource);
        let api = match &self.config.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &api_resource),
            None => Api::all_with(self.client.clone(), &api_resource),
        };
        (api, api_resource)
    }

    fn watcher_config(&self) -> watcher::Config {
        let mut wc = watcher::Config::default();
        if let Some(selector) = &self.config.label_selector {
            wc = wc.labels(selector);
        }
        if let Some(selector) = &self.config.field_selector {
            wc = wc.fields(selector);
        }
        wc
    }

    fn resync_period(&self) -> Duration {
        self.config
            .resync_period
            .as_deref()
            .and_then(|s| humantime::parse_duration(s).ok())
            .unwrap_or(DEFAULT_RESYNC)
    }

    async fn handle_event(&self, event: Event<DynamicObject>, tx: &mpsc::Sender<RawEvent>) {
        match event {
            Event::Applied(obj) => self.emit(obj, tx).await,
            Event::Restarted(objs) => {
                // List-sync replay: dedup is relied on to absorb duplicates
                // (spec §5's "informer list→watch transitions may replay
                // existing objects; dedup must absorb the replay").
                for obj in objs {
                    self.emit(obj, tx).await;
                }
            }
            Event::Deleted(_) => {
                // The system is additive (spec §4.6): deletes produce no event.
            }
        }
    }

    async fn emit(&self, obj: DynamicObject, tx: &mpsc::Sender<RawEvent>) {
        let hint = EventHint {
            resource: resource_ref(&obj),
            namespace: obj.metadata.namespace.clone(),
            native_severity: None,
            event_type: None,
            detected_at: None,
        };
        let payload = serde_json::to_value(&obj).unwrap_or(serde_json::Value::Null);
        let raw = RawEvent::new(self.source.clone(), payload).with_hint(hint);

        counter!("zen_watcher_adapter_events_total", "source" => self.source.clone(), "kind" => "informer")
            .increment(1);
        self.status.record_event();

        if tx.send(raw).await.is_err() {
            warn!(source = %self.source, "pipeline intake channel closed, dropping informer event");
        }
    }
}

fn resource_ref(obj: &DynamicObject) -> Option<ResourceRef> {
    let types = obj.types.as_ref()?;
    Some(ResourceRef {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: obj.metadata.name.clone().unwrap_or_default(),
        namespace: obj.metadata.namespace.clone(),
    })
}

#[async_trait]
impl SourceAdapter for InformerAdapter {
    fn source(&self) -> &str {
        &self.source
    }

    fn status(&self) -> AdapterStatus {
        self.status.snapshot()
    }

    async fn start(&self, tx: mpsc::Sender<RawEvent>, cancel: CancellationToken) -> Result<(), Error> {
        let (api, _api_resource) = self.api();
        let wc = self.watcher_config();
        let resync = self.resync_period();

        info!(source = %self.source, gvr = %format!("{}/{}/{}", self.config.group, self.config.version, self.config.resource), "starting informer adapter");

        'outer: loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let stream = watcher::watcher(api.clone(), wc.clone());
            tokio::pin!(stream);
            let resync_deadline = tokio::time::sleep(resync);
            tokio::pin!(resync_deadline);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = &mut resync_deadline => continue 'outer,
                    item = stream.next() => {
                        match item {
                            Some(Ok(event)) => self.handle_event(event, &tx).await,
                            Some(Err(e)) => {
                                self.status.record_error();
                                counter!("zen_watcher_adapter_errors_total", "source" => self.source.clone(), "kind" => "informer").increment(1);
                                warn!(source = %self.source, error = %e, "[ADAPTER_ERROR] informer watch disconnected, reconnecting");
                                tokio::time::sleep(RECONNECT_BACKOFF).await;
                                continue 'outer;
                            }
                            None => continue 'outer,
                        }
                    }
                }
            }
        }
    }
}
