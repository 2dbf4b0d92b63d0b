//! Ingester reconciler / orchestrator (C9, spec §4.9): watches Ingester CRs
//! cluster-wide and owns the running table of adapter + pipeline pairs.
//!
//! Grounded on the `kube::runtime::watcher` idiom the informer adapter
//! already uses rather than `kube::runtime::controller::Controller`: this
//! reconciler's "reconcile" step is a synchronous table update driven
//! directly off watch events, with no requeue semantics to model.
//!
//! Leadership gates *which adapter kinds* run, not the watch loop itself
//! (spec §4.10: the reconciler and the informer/logs adapters it starts are
//! leader-gated, but webhook adapter handlers run on every replica). The
//! Ingester watch therefore stays up across leadership transitions; only
//! the informer/logs half of the running table is torn down and rebuilt.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, Resource, ResourceExt};
use metrics::counter;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::k8s::ingester::{Ingester, IngesterKind, IngesterSpec};
use crate::leader::LeaderHandle;
use crate::pipeline::Pipeline;
use crate::sources::{InformerAdapter, LogsAdapter, SourceAdapter, WebhookAdapter};
use crate::webhook_server::WebhookRegistry;

const PIPELINE_CHANNEL_CAPACITY: usize = 256;
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

type IngesterKey = (String, String);

struct RunningIngester {
    generation: i64,
    kind: IngesterKind,
    cancel: CancellationToken,
    adapter_task: JoinHandle<()>,
    consumer_task: JoinHandle<()>,
}

pub struct Reconciler {
    client: Client,
    webhook_registry: WebhookRegistry,
    leader: LeaderHandle,
    drain_timeout: Duration,
    running: HashMap<IngesterKey, RunningIngester>,
    /// Last-observed spec per key, kept even for entries this replica isn't
    /// currently running, so a leadership gain can start the informer/logs
    /// adapters it was skipping without waiting for the next watch event.
    specs: HashMap<IngesterKey, Ingester>,
}

impl Reconciler {
    pub fn new(
        client: Client,
        webhook_registry: WebhookRegistry,
        leader: LeaderHandle,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            client,
            webhook_registry,
            leader,
            drain_timeout,
            running: HashMap::new(),
            specs: HashMap::new(),
        }
    }

    /// Runs until `cancel` fires. The Ingester watch itself runs on every
    /// replica (webhook-kind ingesters need it everywhere); leadership only
    /// gates whether informer/logs adapters and status writes happen.
    pub async fn run(mut self, cancel: CancellationToken) {
        let api: Api<Ingester> = Api::all(self.client.clone());
        let mut leader = self.leader.clone();

        'outer: loop {
            if cancel.is_cancelled() {
                self.stop_all().await;
                return;
            }

            let stream = watcher::watcher(api.clone(), watcher::Config::default());
            tokio::pin!(stream);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => { self.stop_all().await; return; }
                    changed = leader.changed() => {
                        if changed.is_ok() {
                            self.handle_leadership_change(leader.is_leader()).await;
                        }
                    }
                    item = stream.next() => {
                        match item {
                            Some(Ok(Event::Applied(ingester))) => {
                                self.specs.insert(key_of(&ingester), ingester.clone());
                                self.reconcile_one(ingester, leader.is_leader()).await;
                            }
                            Some(Ok(Event::Restarted(list))) => {
                                let keys: HashSet<IngesterKey> = list.iter().map(key_of).collect();
                                for ingester in list {
                                    self.specs.insert(key_of(&ingester), ingester.clone());
                                    self.reconcile_one(ingester, leader.is_leader()).await;
                                }
                                self.remove_missing(&keys).await;
                            }
                            Some(Ok(Event::Deleted(ingester))) => {
                                let key = key_of(&ingester);
                                self.specs.remove(&key);
                                self.remove_one(&key).await;
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "[ADAPTER_ERROR] ingester watch disconnected, reconnecting");
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

    /// On a leadership transition, stops or (re)starts only the
    /// informer/logs half of the running table; webhook adapters are
    /// untouched (spec §4.10: they run on every replica regardless).
    async fn handle_leadership_change(&mut self, is_leader: bool) {
        if is_leader {
            info!("acquired leadership, starting informer/logs adapters");
            let specs: Vec<Ingester> = self.specs.values().cloned().collect();
            for ingester in specs {
                self.reconcile_one(ingester, true).await;
            }
        } else {
            info!("lost leadership, stopping informer/logs adapters");
            let stale: Vec<_> = self
                .running
                .iter()
                .filter(|(_, running)| running.kind != IngesterKind::Webhook)
                .map(|(key, _)| key.clone())
                .collect();
            for key in stale {
                self.stop_one(&key).await;
            }
        }
    }

    /// Reconciles one observed Ingester. A no-op if the running table
    /// already reflects this exact generation (spec §4.9: "repeated
    /// reconciliation of an unchanged spec is a no-op"). Informer/logs
    /// ingesters are skipped entirely on a non-leader replica; webhook
    /// ingesters always proceed.
    async fn reconcile_one(&mut self, ingester: Ingester, is_leader: bool) {
        let namespace = ingester.namespace().unwrap_or_default();
        let name = ingester.name_any();
        let generation = ingester.meta().generation.unwrap_or(0);
        let key = (namespace.clone(), name.clone());
        let kind = ingester.spec.ingester;

        if kind != IngesterKind::Webhook && !is_leader {
            return;
        }

        if matches!(self.running.get(&key), Some(running) if running.generation == generation) {
            return;
        }

        self.stop_one(&key).await;

        let adapter = match self.build_adapter(&namespace, &ingester.spec) {
            Ok(adapter) => adapter,
            Err(reason) => {
                counter!(
                    "zen_watcher_ingesters_config_errors_total",
                    "source" => ingester.spec.source.clone(),
                    "reason" => "adapter_construction",
                )
                .increment(1);
                warn!(
                    namespace = %namespace, name = %name, reason = %reason,
                    "[CONFIG_ERROR] failed to construct adapter"
                );
                if is_leader {
                    self.patch_status(&namespace, &name, "Failed", "ConfigError", &reason, generation)
                        .await;
                }
                return;
            }
        };

        let pipeline = Arc::new(Pipeline::new(
            self.client.clone(),
            Arc::new(ingester.spec.clone()),
            &namespace,
        ));
        let (tx, mut rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let adapter_task = {
            let adapter = adapter.clone();
            let cancel = cancel.clone();
            let source = ingester.spec.source.clone();
            tokio::spawn(async move {
                if let Err(e) = adapter.start(tx, cancel).await {
                    warn!(source = %source, error = %e, "adapter exited with error");
                }
            })
        };

        let consumer_task = tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                pipeline.process(raw).await;
            }
        });

        self.running.insert(
            key,
            RunningIngester {
                generation,
                kind,
                cancel,
                adapter_task,
                consumer_task,
            },
        );

        info!(namespace = %namespace, name = %name, source = %ingester.spec.source, "ingester reconciled");
        if is_leader {
            self.patch_status(&namespace, &name, "Ready", "ReconcileSucceeded", "adapter running", generation)
                .await;
        }
    }

    async fn remove_one(&mut self, key: &IngesterKey) {
        self.stop_one(key).await;
        info!(namespace = %key.0, name = %key.1, "ingester removed");
    }

    async fn remove_missing(&mut self, current: &HashSet<IngesterKey>) {
        let stale: Vec<_> = self
            .specs
            .keys()
            .filter(|key| !current.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            self.specs.remove(&key);
            self.remove_one(&key).await;
        }
    }

    async fn stop_all(&mut self) {
        let keys: Vec<_> = self.running.keys().cloned().collect();
        for key in keys {
            self.stop_one(&key).await;
        }
    }

    /// Cancels the running adapter and waits up to `drain_timeout` for its
    /// task and the consumer task to finish draining the intake channel
    /// (spec §4.9: "drain its in-flight events with a bounded timeout").
    async fn stop_one(&mut self, key: &IngesterKey) {
        let Some(running) = self.running.remove(key) else {
            return;
        };
        running.cancel.cancel();
        let drain = async {
            let _ = running.adapter_task.await;
            let _ = running.consumer_task.await;
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(namespace = %key.0, name = %key.1, "adapter drain timed out, abandoning tasks");
        }
    }

    fn build_adapter(&self, namespace: &str, spec: &IngesterSpec) -> Result<Arc<dyn SourceAdapter>, String> {
        match spec.ingester {
            IngesterKind::Informer => {
                let config = spec
                    .informer
                    .clone()
                    .ok_or_else(|| "informer ingester missing `informer` config block".to_string())?;
                Ok(Arc::new(InformerAdapter::new(spec.source.clone(), config, self.client.clone())))
            }
            IngesterKind::Webhook => {
                let config = spec
                    .webhook
                    .clone()
                    .ok_or_else(|| "webhook ingester missing `webhook` config block".to_string())?;
                Ok(Arc::new(WebhookAdapter::new(
                    spec.source.clone(),
                    namespace.to_string(),
                    config,
                    self.webhook_registry.clone(),
                )))
            }
            IngesterKind::Logs => {
                let config = spec
                    .logs
                    .clone()
                    .ok_or_else(|| "logs ingester missing `logs` config block".to_string())?;
                LogsAdapter::new(spec.source.clone(), namespace.to_string(), config, self.client.clone())
                    .map(|adapter| Arc::new(adapter) as Arc<dyn SourceAdapter>)
                    .map_err(|e| e.to_string())
            }
        }
    }

    async fn patch_status(&self, namespace: &str, name: &str, condition: &str, reason: &str, message: &str, generation: i64) {
        let api: Api<Ingester> = Api::namespaced(self.client.clone(), namespace);
        let now = Utc::now().to_rfc3339();
        let patch = json!({
            "status": {
                "conditions": [{
                    "type": condition,
                    "status": "True",
                    "reason": reason,
                    "message": message,
                    "lastTransitionTime": now,
                    "observedGeneration": generation,
                }],
                "observedGeneration": generation,
                "lastEventAt": now,
            }
        });
        if let Err(e) = api
            .patch_status(name, &PatchParams::apply("zen-watcher"), &Patch::Merge(&patch))
            .await
        {
            warn!(namespace, name, error = %e, "failed to patch ingester status");
        }
    }
}

fn key_of(ingester: &Ingester) -> IngesterKey {
    (ingester.namespace().unwrap_or_default(), ingester.name_any())
}
