//! Destination writer (C7, spec §4.7): creates the target CR for an
//! accepted, normalized event.

use std::time::Duration;

use kube::api::{DynamicObject, ObjectMeta, PostParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Api, Client};
use metrics::{counter, histogram};
use serde_json::json;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::Error;
use crate::k8s::ingester::ExplicitGvr;
use crate::k8s::observation::ObservationSpec;

/// Writes normalized events to one destination GVR.
///
/// Uses a generated name, never a deterministic one, because the input has
/// already been deduplicated upstream — spec §4.7's idempotency anchor.
pub struct DestinationWriter {
    client: Client,
    api_resource: ApiResource,
    gvk: GroupVersionKind,
    gvr_label: String,
    default_namespace: String,
    ttl_default_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Success,
    NotAllowed,
    Conflict,
    Failure,
}

impl DestinationWriter {
    /// Builds a writer for `gvr`, targeting `namespace` (typically the
    /// originating resource's own namespace, for RBAC locality per spec
    /// §3.2).
    ///
    /// The Ingester schema (spec §3.1) only ever declares group/version/
    /// resource, never `kind` — so `kind` here is derived from the plural
    /// resource name by a simple singularization heuristic rather than by
    /// querying cluster discovery. This is sufficient for the one
    /// destination the core ships a schema for (`observations` →
    /// `Observation`) and for any destination CRD whose plural is a
    /// straightforward `s`-suffixed form of its kind.
    pub fn new(
        client: Client,
        gvr: &ExplicitGvr,
        default_namespace: &str,
        ttl_default_seconds: Option<i64>,
    ) -> Self {
        let kind = crate::k8s::gvr_to_kind(&gvr.resource);
        let gvk = GroupVersionKind {
            group: gvr.group.clone(),
            version: gvr.version.clone(),
            kind,
        };
        let api_resource = ApiResource::from_gvk_with_plural(&gvk, &gvr.resource);
        Self {
            client,
            api_resource,
            gvr_label: format!("{}/{}/{}", gvr.group, gvr.version, gvr.resource),
            gvk,
            default_namespace: default_namespace.to_string(),
            ttl_default_seconds,
        }
    }

    /// Issues the create request against `namespace` (the event's own
    /// resource namespace when known, falling back to the ingester's
    /// default), retrying bounded exponential backoff on retriable
    /// transport errors (timeouts, 5xx), per spec §4.7.
    pub async fn write(&self, source: &str, namespace: Option<&str>, spec: &ObservationSpec) -> WriteOutcome {
        let namespace = namespace.unwrap_or(&self.default_namespace);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.api_resource);

        let mut stamped = spec.clone();
        let ttl = stamped.ttl_seconds_after_creation.or(self.ttl_default_seconds);
        stamped.ttl_seconds_after_creation =
            ttl.map(|t| crate::config::clamp_ttl_seconds(t, "ttlSecondsAfterCreation"));

        let object = self.build_object(namespace, &stamped);

        const MAX_ATTEMPTS: u32 = 3;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let start = Instant::now();
            match api.create(&PostParams::default(), &object).await {
                Ok(_) => {
                    histogram!(
                        "zen_watcher_destination_write_duration_seconds",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                    )
                    .record(start.elapsed().as_secs_f64());
                    counter!(
                        "zen_watcher_destination_writes_total",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                        "outcome" => "success",
                    )
                    .increment(1);
                    return WriteOutcome::Success;
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    // The event was already deduplicated; a conflict here
                    // means a cross-replica race on a webhook source, not a
                    // bug. Terminal: log and drop.
                    warn!(source, gvr = %self.gvr_label, "[CRD_WRITE_ERROR] conflict, dropping");
                    histogram!(
                        "zen_watcher_destination_write_duration_seconds",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                    )
                    .record(start.elapsed().as_secs_f64());
                    counter!(
                        "zen_watcher_destination_writes_total",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                        "outcome" => "conflict",
                    )
                    .increment(1);
                    return WriteOutcome::Conflict;
                }
                Err(kube::Error::Api(ae)) if ae.code == 403 || ae.code == 401 => {
                    warn!(source, gvr = %self.gvr_label, reason = %ae.message, "[CRD_WRITE_ERROR] not_allowed");
                    histogram!(
                        "zen_watcher_destination_write_duration_seconds",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                    )
                    .record(start.elapsed().as_secs_f64());
                    counter!(
                        "zen_watcher_destination_writes_total",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                        "outcome" => "not_allowed",
                    )
                    .increment(1);
                    return WriteOutcome::NotAllowed;
                }
                Err(kube::Error::Api(ae)) if ae.code == 429 || ae.code >= 500 => {
                    if attempt >= MAX_ATTEMPTS {
                        error!(source, gvr = %self.gvr_label, reason = %ae.message, "[CRD_WRITE_ERROR] failure after retries");
                        histogram!(
                            "zen_watcher_destination_write_duration_seconds",
                            "source" => source.to_string(),
                            "gvr" => self.gvr_label.clone(),
                        )
                        .record(start.elapsed().as_secs_f64());
                        counter!(
                            "zen_watcher_destination_writes_total",
                            "source" => source.to_string(),
                            "gvr" => self.gvr_label.clone(),
                            "outcome" => "failure",
                        )
                        .increment(1);
                        return WriteOutcome::Failure;
                    }
                    tokio::time::sleep(backoff(attempt)).await;
                }
                Err(e) => {
                    error!(source, gvr = %self.gvr_label, error = %e, "[CRD_WRITE_ERROR] non-retriable failure");
                    histogram!(
                        "zen_watcher_destination_write_duration_seconds",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                    )
                    .record(start.elapsed().as_secs_f64());
                    counter!(
                        "zen_watcher_destination_writes_total",
                        "source" => source.to_string(),
                        "gvr" => self.gvr_label.clone(),
                        "outcome" => "failure",
                    )
                    .increment(1);
                    return WriteOutcome::Failure;
                }
            }
        }
    }

    fn build_object(&self, namespace: &str, spec: &ObservationSpec) -> DynamicObject {
        let mut object = DynamicObject::new("", &self.api_resource);
        object.metadata = ObjectMeta {
            generate_name: Some(format!("{}-", spec.source)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        };
        object.types = Some(kube::api::TypeMeta {
            api_version: if self.gvk.group.is_empty() {
                self.gvk.version.clone()
            } else {
                format!("{}/{}", self.gvk.group, self.gvk.version)
            },
            kind: self.gvk.kind.clone(),
        });
        object.data = json!({ "spec": spec });
        object
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(200u64.saturating_mul(1 << attempt.min(5)))
}

/// Maps a destination-level failure into the shared error taxonomy for
/// callers that need an `Error` rather than a [`WriteOutcome`].
pub fn outcome_to_error(outcome: WriteOutcome, source: &str, gvr: &str) -> Option<Error> {
    match outcome {
        WriteOutcome::Success => None,
        WriteOutcome::NotAllowed => Some(Error::CrdWriteNotAllowed {
            source_name: source.to_string(),
            gvr: gvr.to_string(),
            reason: "permission denied or policy rejection".to_string(),
        }),
        WriteOutcome::Conflict => Some(Error::CrdWriteConflict {
            source_name: source.to_string(),
            gvr: gvr.to_string(),
        }),
        WriteOutcome::Failure => Some(Error::CrdWriteFailure {
            source_name: source.to_string(),
            gvr: gvr.to_string(),
            reason: "transport or API failure".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_labels_gvr_as_slash_joined_triple() {
        let gvr = ExplicitGvr {
            group: "zen.kube-zen.io".into(),
            version: "v1".into(),
            resource: "observations".into(),
        };
        let label = format!("{}/{}/{}", gvr.group, gvr.version, gvr.resource);
        assert_eq!(label, "zen.kube-zen.io/v1/observations");
        assert_eq!(crate::k8s::gvr_to_kind(&gvr.resource), "Observation");
    }
}
