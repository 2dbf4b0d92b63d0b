//! Leader-election gate (C10, spec §4.10): a Lease-backed gate partitioning
//! singleton work (the reconciler, informer/logs adapters, GC) from work
//! that runs on every replica (webhook server, health endpoints, metrics).

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const LEASE_DURATION: Duration = Duration::from_secs(15);
const RENEW_DEADLINE: Duration = Duration::from_secs(10);
const RETRY_PERIOD: Duration = Duration::from_secs(2);

/// Cheap, cloneable read handle onto the current leadership state. `None`
/// until the first lease cycle completes; `/readyz` reports not-ready for
/// that window (spec §4.11: "200 when the leader lease state is known").
#[derive(Clone)]
pub struct LeaderHandle(watch::Receiver<Option<bool>>);

impl LeaderHandle {
    pub fn is_known(&self) -> bool {
        self.0.borrow().is_some()
    }

    pub fn is_leader(&self) -> bool {
        self.0.borrow().unwrap_or(false)
    }

    /// Awaits the next leadership transition, used by gated components to
    /// start/stop in response rather than polling.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.0.changed().await
    }

    pub fn current(&self) -> Option<bool> {
        *self.0.borrow()
    }
}

pub struct LeaderElector {
    client: Client,
    namespace: String,
    lease_name: String,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: String, lease_name: String, identity: String) -> Self {
        Self {
            client,
            namespace,
            lease_name,
            identity,
        }
    }

    pub fn handle(&self) -> (LeaderHandle, watch::Sender<Option<bool>>) {
        let (tx, rx) = watch::channel(None);
        (LeaderHandle(rx), tx)
    }

    /// Runs the acquire/renew loop until `cancel` fires. On cancellation
    /// while leading, releases the lease by clearing `holderIdentity` so
    /// the next replica can acquire it immediately rather than waiting out
    /// `LEASE_DURATION`.
    pub async fn run(self, state: watch::Sender<Option<bool>>, cancel: CancellationToken) {
        let api: Api<Lease> = Api::namespaced(self.client.clone(), &self.namespace);
        let mut leading = false;

        loop {
            if cancel.is_cancelled() {
                if leading {
                    self.release(&api).await;
                }
                return;
            }

            match self.try_acquire_or_renew(&api, leading).await {
                Ok(acquired) => {
                    if acquired != leading {
                        info!(identity = %self.identity, leading = acquired, "leadership transition");
                    }
                    leading = acquired;
                    let _ = state.send(Some(leading));
                }
                Err(e) => {
                    warn!(error = %e, "lease operation failed, assuming follower");
                    leading = false;
                    let _ = state.send(Some(false));
                }
            }

            let sleep_for = if leading { RENEW_DEADLINE } else { RETRY_PERIOD };
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => {
                    if leading {
                        self.release(&api).await;
                    }
                    return;
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self, api: &Api<Lease>, currently_leading: bool) -> Result<bool, kube::Error> {
        let now = MicroTime(Utc::now());
        match api.get_opt(&self.lease_name).await? {
            None => {
                let lease = Lease {
                    metadata: kube::core::ObjectMeta {
                        name: Some(self.lease_name.clone()),
                        namespace: Some(self.namespace.clone()),
                        ..Default::default()
                    },
                    spec: Some(LeaseSpec {
                        holder_identity: Some(self.identity.clone()),
                        lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
                        acquire_time: Some(now.clone()),
                        renew_time: Some(now),
                        lease_transitions: Some(0),
                        ..Default::default()
                    }),
                };
                match api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
                    Err(e) => Err(e),
                }
            }
            Some(existing) => {
                let spec = existing.spec.unwrap_or_default();
                let held_by_us = spec.holder_identity.as_deref() == Some(self.identity.as_str());
                let expired = spec
                    .renew_time
                    .as_ref()
                    .map(|t| Utc::now().signed_duration_since(t.0) > chrono::Duration::seconds(LEASE_DURATION.as_secs() as i64))
                    .unwrap_or(true);

                if !held_by_us && !expired {
                    return Ok(false);
                }

                let transitions = if held_by_us {
                    spec.lease_transitions.unwrap_or(0)
                } else {
                    spec.lease_transitions.unwrap_or(0) + 1
                };
                let patch = serde_json::json!({
                    "spec": {
                        "holderIdentity": self.identity.clone(),
                        "leaseDurationSeconds": LEASE_DURATION.as_secs() as i32,
                        "renewTime": now,
                        "acquireTime": if held_by_us { spec.acquire_time } else { Some(now.clone()) },
                        "leaseTransitions": transitions,
                    }
                });
                match api
                    .patch(&self.lease_name, &PatchParams::apply("zen-watcher"), &Patch::Merge(&patch))
                    .await
                {
                    Ok(_) => Ok(true),
                    Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(currently_leading && held_by_us),
                    Err(e) => Err(e),
                }
            }
        }
    }

    async fn release(&self, api: &Api<Lease>) {
        let patch = serde_json::json!({ "spec": { "holderIdentity": Option::<String>::None } });
        if let Err(e) = api
            .patch(&self.lease_name, &PatchParams::apply("zen-watcher"), &Patch::Merge(&patch))
            .await
        {
            warn!(error = %e, "failed to release leader lease on shutdown");
        }
    }
}
