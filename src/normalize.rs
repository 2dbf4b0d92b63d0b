//! Normalizer (C4, spec §4.4): raw event + ingester config → Observation
//! spec.

use chrono::{DateTime, Utc};
use metrics::counter;
use snafu::OptionExt;

use crate::error::{self, Error};
use crate::event::RawEvent;
use crate::k8s::ingester::{IngesterSpec, NormalizationConfig};
use crate::k8s::observation::{Category, ObservationSpec, ResourceRef, Severity};
use crate::path;

/// Priority-to-severity bucket thresholds. The spec names a `priority`
/// string→float table but leaves the float→bucket mapping unspecified; this
/// is the one place in the engine that resolves that ambiguity (see
/// `DESIGN.md`). Chosen so the five buckets partition `[0.0, 1.0]` evenly
/// with `critical` reserved for the top decile, matching how `minPriority`
/// is used elsewhere in the spec as a near-1.0 threshold for "only the
/// worst".
fn bucket_priority(priority: f64) -> Severity {
    if priority >= 0.9 {
        Severity::Critical
    } else if priority >= 0.7 {
        Severity::High
    } else if priority >= 0.4 {
        Severity::Medium
    } else if priority >= 0.1 {
        Severity::Low
    } else {
        Severity::Info
    }
}

/// Fields the normalizer resolves that other stages (the filter's
/// expression view, in particular) also need. Kept as its own struct so
/// filtering and normalization share one resolution path instead of two
/// subtly-different ones.
#[derive(Debug, Clone, Default)]
pub struct ResolvedFields {
    pub severity: Option<Severity>,
    pub priority: Option<f64>,
    pub namespace: Option<String>,
    pub event_type: String,
    pub resource: Option<ResourceRef>,
    pub detected_at: Option<DateTime<Utc>>,
}

/// Resolves the fields every stage needs from a raw event, without failing
/// on anything missing — callers decide what's required.
pub fn resolve_fields(raw: &RawEvent, norm: &NormalizationConfig) -> ResolvedFields {
    let native_severity = norm
        .field_mappings
        .get("severity")
        .and_then(|p| path::extract_str(&raw.payload, p))
        .or_else(|| raw.hint.native_severity.clone());

    let priority = norm
        .field_mappings
        .get("priority")
        .and_then(|p| path::extract_f64(&raw.payload, p))
        .or_else(|| {
            native_severity
                .as_deref()
                .and_then(|token| norm.priority.get(token).copied())
        });

    let severity = native_severity
        .as_deref()
        .and_then(Severity::parse_token)
        .or_else(|| priority.map(bucket_priority));

    let namespace = norm
        .field_mappings
        .get("resource.namespace")
        .and_then(|p| path::extract_str(&raw.payload, p))
        .or_else(|| raw.hint.namespace.clone())
        .or_else(|| {
            raw.hint
                .resource
                .as_ref()
                .and_then(|r| r.namespace.clone())
        });

    let event_type = norm
        .field_mappings
        .get("eventType")
        .and_then(|p| path::extract_str(&raw.payload, p))
        .or_else(|| raw.hint.event_type.clone())
        .unwrap_or_else(|| norm.event_type.clone());

    let resource = resolve_resource(raw, norm);

    let detected_at = norm
        .field_mappings
        .get("detectedAt")
        .and_then(|p| path::extract_str(&raw.payload, p))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or(raw.hint.detected_at);

    ResolvedFields {
        severity,
        priority,
        namespace,
        event_type,
        resource,
        detected_at,
    }
}

fn resolve_resource(raw: &RawEvent, norm: &NormalizationConfig) -> Option<ResourceRef> {
    let api_version = norm
        .field_mappings
        .get("resource.apiVersion")
        .and_then(|p| path::extract_str(&raw.payload, p));
    let kind = norm
        .field_mappings
        .get("resource.kind")
        .and_then(|p| path::extract_str(&raw.payload, p));
    let name = norm
        .field_mappings
        .get("resource.name")
        .and_then(|p| path::extract_str(&raw.payload, p));

    if let (Some(api_version), Some(kind), Some(name)) = (api_version, kind, name) {
        let namespace = norm
            .field_mappings
            .get("resource.namespace")
            .and_then(|p| path::extract_str(&raw.payload, p));
        return Some(ResourceRef {
            api_version,
            kind,
            name,
            namespace,
        });
    }

    raw.hint.resource.clone()
}

/// Builds the normalized Observation spec for one admitted raw event,
/// draining `raw` by value since no later stage needs it once normalized.
pub fn normalize(raw: RawEvent, ingester: &IngesterSpec) -> Result<ObservationSpec, Error> {
    let norm = &ingester.normalization;
    let resolved = resolve_fields(&raw, norm);

    let severity = resolved.severity.context(error::NormalizeSnafu {
        source_name: ingester.source.clone(),
        field: "severity".to_string(),
    })?;

    counter!("zen_watcher_normalize_total", "source" => ingester.source.clone()).increment(1);

    let details = norm
        .field_mappings
        .get("details")
        .and_then(|p| path::extract(&raw.payload, p).cloned())
        .or(Some(raw.payload));

    Ok(ObservationSpec {
        source: ingester.source.clone(),
        category: norm.domain,
        severity,
        event_type: resolved.event_type,
        detected_at: resolved.detected_at.unwrap_or_else(Utc::now),
        resource: resolved.resource,
        details,
        ttl_seconds_after_creation: None,
    })
}

/// `category` is a plain enum copy; re-exported here so call sites that only
/// have `normalize::Category` in scope don't need to reach into `k8s`.
pub use Category as ObservationCategory;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::ingester::NormalizationConfig;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn norm_config() -> NormalizationConfig {
        NormalizationConfig {
            domain: Category::Security,
            event_type: "cve_found".into(),
            priority: {
                let mut m = BTreeMap::new();
                m.insert("HIGH".to_string(), 0.8);
                m
            },
            field_mappings: BTreeMap::new(),
            critical_fields: vec![],
        }
    }

    #[test]
    fn bucket_thresholds_are_monotonic() {
        assert_eq!(bucket_priority(1.0), Severity::Critical);
        assert_eq!(bucket_priority(0.9), Severity::Critical);
        assert_eq!(bucket_priority(0.75), Severity::High);
        assert_eq!(bucket_priority(0.5), Severity::Medium);
        assert_eq!(bucket_priority(0.2), Severity::Low);
        assert_eq!(bucket_priority(0.0), Severity::Info);
    }

    #[test]
    fn resolves_severity_via_priority_table() {
        let mut raw = RawEvent::new("trivy", json!({}));
        raw.hint.native_severity = Some("HIGH".to_string());
        let resolved = resolve_fields(&raw, &norm_config());
        assert_eq!(resolved.severity, Some(Severity::High));
        assert_eq!(resolved.priority, Some(0.8));
    }

    #[test]
    fn missing_severity_is_normalize_error() {
        let raw = RawEvent::new("trivy", json!({}));
        let spec = IngesterSpec {
            source: "trivy".into(),
            ingester: crate::k8s::ingester::IngesterKind::Informer,
            informer: None,
            webhook: None,
            logs: None,
            filters: Default::default(),
            deduplication: Default::default(),
            normalization: norm_config(),
            destinations: vec![],
            processing: Default::default(),
        };
        let err = normalize(raw, &spec).unwrap_err();
        assert!(matches!(err, Error::Normalize { .. }));
    }
}
