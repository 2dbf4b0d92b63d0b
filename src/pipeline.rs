//! Pipeline (C5, spec §4.5): wires filter, dedup, normalization, and
//! destination dispatch for one ingester instance.

use std::sync::Arc;

use futures::future::join_all;
use kube::Client;
use metrics::counter;
use tracing::{info, warn};

use crate::dedup::{DedupCache, DedupOutcome};
use crate::destination::DestinationWriter;
use crate::event::RawEvent;
use crate::filter::CompiledFilter;
use crate::k8s::ingester::{IngesterSpec, ProcessingOrder};
use crate::normalize;

/// One ingester's running pipeline: a filter, a dedup cache, and a
/// destination fan-out, all private to this ingester (spec §5: "never
/// shared across ingesters").
pub struct Pipeline {
    ingester: Arc<IngesterSpec>,
    filter: CompiledFilter,
    dedup: Arc<DedupCache>,
    destinations: Vec<DestinationWriter>,
    default_namespace: String,
}

impl Pipeline {
    pub fn new(client: Client, ingester: Arc<IngesterSpec>, default_namespace: &str) -> Self {
        let filter = CompiledFilter::compile(&ingester.source, &ingester.filters);
        let dedup = Arc::new(DedupCache::new(&ingester.deduplication));
        let destinations = ingester
            .destinations
            .iter()
            .map(|dest| {
                let gvr = dest.resolve_gvr();
                DestinationWriter::new(
                    client.clone(),
                    &gvr,
                    default_namespace,
                    dest.ttl_seconds_after_creation,
                )
            })
            .collect();
        Self {
            ingester,
            filter,
            dedup,
            destinations,
            default_namespace: default_namespace.to_string(),
        }
    }

    pub fn dedup_cache(&self) -> Arc<DedupCache> {
        self.dedup.clone()
    }

    /// Runs one raw event through filter, dedup, normalization, and
    /// destination dispatch, in the order spec §4.5's `processing.order`
    /// hint prefers. Both stages always run when the event reaches this
    /// far; the hint only changes which cheap rejection is attempted first.
    pub async fn process(&self, raw: RawEvent) {
        counter!("zen_watcher_events_received_total", "source" => self.ingester.source.clone())
            .increment(1);

        let (admit, dedup_outcome) = match self.ingester.processing.order {
            ProcessingOrder::FilterFirst => {
                let (pass, reason) = self.filter.evaluate(&raw, &self.ingester);
                if !pass {
                    self.record_filtered(&reason);
                    return;
                }
                let outcome = self.dedup.check_and_record(&raw, &self.ingester.normalization);
                (outcome == DedupOutcome::Admitted, outcome)
            }
            ProcessingOrder::DedupFirst => {
                let outcome = self.dedup.check_and_record(&raw, &self.ingester.normalization);
                if outcome != DedupOutcome::Admitted {
                    self.record_duplicate();
                    return;
                }
                let (pass, reason) = self.filter.evaluate(&raw, &self.ingester);
                if !pass {
                    self.record_filtered(&reason);
                    return;
                }
                (true, outcome)
            }
        };

        if !admit {
            if dedup_outcome == DedupOutcome::Duplicate {
                self.record_duplicate();
            }
            return;
        }

        let spec = match normalize::normalize(raw, &self.ingester) {
            Ok(spec) => spec,
            Err(e) => {
                warn!(source = %self.ingester.source, error = %e, "dropping event after normalize failure");
                return;
            }
        };

        self.dispatch(spec).await;
    }

    fn record_filtered(&self, reason: &str) {
        counter!("zen_watcher_events_filtered_total", "source" => self.ingester.source.clone())
            .increment(1);
        tracing::debug!(source = %self.ingester.source, reason, "event filtered out");
    }

    fn record_duplicate(&self) {
        counter!("zen_watcher_events_deduplicated_total", "source" => self.ingester.source.clone())
            .increment(1);
    }

    /// Writes `spec` to every configured destination in parallel. Each
    /// destination's failure is independent: one destination rejecting the
    /// write never blocks or cancels the others (spec §4.5).
    async fn dispatch(&self, spec: crate::k8s::observation::ObservationSpec) {
        if self.destinations.is_empty() {
            return;
        }
        let namespace = spec
            .resource
            .as_ref()
            .and_then(|r| r.namespace.clone())
            .unwrap_or_else(|| self.default_namespace.clone());

        let writes = self
            .destinations
            .iter()
            .map(|writer| writer.write(&self.ingester.source, Some(namespace.as_str()), &spec));
        let outcomes = join_all(writes).await;

        let failures = outcomes
            .iter()
            .filter(|o| !matches!(o, crate::destination::WriteOutcome::Success))
            .count();
        if failures == 0 {
            info!(source = %self.ingester.source, event_type = %spec.event_type, "observation dispatched");
        }
    }
}
