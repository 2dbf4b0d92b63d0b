//! End-to-end coverage of the filter → dedup → normalize chain (spec §4.5)
//! against a constructed Ingester spec, without a live Kubernetes API
//! server. The destination-write stage needs a real `kube::Client` and is
//! exercised only by `src/destination.rs`'s unit tests.

use std::collections::BTreeMap;

use serde_json::json;

use zen_watcher::dedup::{DedupCache, DedupOutcome};
use zen_watcher::event::{EventHint, RawEvent};
use zen_watcher::filter::CompiledFilter;
use zen_watcher::k8s::ingester::{
    DedupStrategy, DeduplicationConfig, DestinationConfig, DestinationKind, FilterConfig, IngesterKind,
    IngesterSpec, NormalizationConfig, ProcessingConfig, ProcessingOrder,
};
use zen_watcher::k8s::observation::{Category, Severity};
use zen_watcher::normalize;

fn falco_ingester() -> IngesterSpec {
    let mut priority = BTreeMap::new();
    priority.insert("Critical".to_string(), 0.95);
    priority.insert("Warning".to_string(), 0.5);

    IngesterSpec {
        source: "falco".to_string(),
        ingester: IngesterKind::Logs,
        informer: None,
        webhook: None,
        logs: None,
        filters: FilterConfig {
            min_severity: Some(Severity::Medium),
            ..Default::default()
        },
        deduplication: DeduplicationConfig {
            enabled: true,
            window: "10m".to_string(),
            strategy: DedupStrategy::Fingerprint,
            fields: vec![],
            max_events_per_window: None,
        },
        normalization: NormalizationConfig {
            domain: Category::Security,
            event_type: "runtime_alert".to_string(),
            priority,
            field_mappings: BTreeMap::new(),
            critical_fields: vec![],
        },
        destinations: vec![DestinationConfig {
            kind: DestinationKind::Crd,
            value: Some("observations".to_string()),
            gvr: None,
            ttl_seconds_after_creation: None,
        }],
        processing: ProcessingConfig {
            order: ProcessingOrder::FilterFirst,
        },
    }
}

fn falco_event(rule: &str) -> RawEvent {
    RawEvent::new(
        "falco",
        json!({ "rule": rule, "priority": "Critical", "output_fields": { "k8s.ns.name": "prod" } }),
    )
    .with_hint(EventHint {
        native_severity: Some("Critical".to_string()),
        namespace: Some("prod".to_string()),
        event_type: Some("runtime_alert".to_string()),
        ..Default::default()
    })
}

#[test]
fn admitted_event_produces_a_matching_observation_spec() {
    let ingester = falco_ingester();
    let filter = CompiledFilter::compile(&ingester.source, &ingester.filters);
    let dedup = DedupCache::new(&ingester.deduplication);

    let raw = falco_event("Terminal shell in container");
    let (pass, _) = filter.evaluate(&raw, &ingester);
    assert!(pass, "critical-priority event should clear minSeverity=medium");

    let outcome = dedup.check_and_record(&raw, &ingester.normalization);
    assert_eq!(outcome, DedupOutcome::Admitted);

    let spec = normalize::normalize(raw, &ingester).expect("normalize should succeed with resolvable severity");
    assert_eq!(spec.source, "falco");
    assert_eq!(spec.category, Category::Security);
    assert_eq!(spec.severity, Severity::Critical);
    assert_eq!(spec.event_type, "runtime_alert");
    assert!(spec.ttl_seconds_after_creation.is_none());
}

#[test]
fn duplicate_within_window_is_suppressed_before_normalize() {
    let ingester = falco_ingester();
    let dedup = DedupCache::new(&ingester.deduplication);

    let first = falco_event("Terminal shell in container");
    let second = falco_event("Terminal shell in container");

    assert_eq!(
        dedup.check_and_record(&first, &ingester.normalization),
        DedupOutcome::Admitted
    );
    assert_eq!(
        dedup.check_and_record(&second, &ingester.normalization),
        DedupOutcome::Duplicate
    );
}

#[test]
fn low_severity_event_is_rejected_by_filter_before_dedup_or_normalize() {
    let mut ingester = falco_ingester();
    ingester.filters.min_severity = Some(Severity::High);

    let filter = CompiledFilter::compile(&ingester.source, &ingester.filters);
    let mut raw = falco_event("Package management process launched");
    raw.hint.native_severity = Some("Warning".to_string());

    let (pass, reason) = filter.evaluate(&raw, &ingester);
    assert!(!pass);
    assert!(reason.contains("below minSeverity"));
}

#[test]
fn dedup_first_order_still_applies_filter() {
    let mut ingester = falco_ingester();
    ingester.processing.order = ProcessingOrder::DedupFirst;
    ingester.filters.min_severity = Some(Severity::Critical);

    let filter = CompiledFilter::compile(&ingester.source, &ingester.filters);
    let dedup = DedupCache::new(&ingester.deduplication);

    let mut raw = falco_event("Read sensitive file untrusted");
    raw.hint.native_severity = Some("Warning".to_string());

    let dedup_outcome = dedup.check_and_record(&raw, &ingester.normalization);
    assert_eq!(dedup_outcome, DedupOutcome::Admitted);

    let (pass, _) = filter.evaluate(&raw, &ingester);
    assert!(!pass, "dedup-first order must not skip the filter stage");
}
