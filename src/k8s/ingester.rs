//! The `Ingester` custom resource: declarative source + processing
//! configuration (spec §3.1).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Generated wrapper struct `Ingester` for [`IngesterSpec`], the way every
/// `kube::CustomResource` in the example operators is declared.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "zen.kube-zen.io",
    version = "v1",
    kind = "Ingester",
    namespaced,
    status = "IngesterStatus",
    shortname = "zing"
)]
#[serde(rename_all = "camelCase")]
pub struct IngesterSpec {
    /// Stable identifier, `[a-z0-9-]+`. Shared verbatim with every
    /// Observation this ingester produces.
    pub source: String,

    /// Which adapter kind this ingester drives.
    pub ingester: IngesterKind,

    /// Config block for an `informer`-kind ingester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub informer: Option<InformerConfig>,

    /// Config block for a `webhook`-kind ingester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,

    /// Config block for a `logs`-kind ingester.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<LogsConfig>,

    /// Admission filtering.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Time-windowed suppression of duplicate events.
    #[serde(default)]
    pub deduplication: DeduplicationConfig,

    /// Raw-event → Observation field mapping.
    pub normalization: NormalizationConfig,

    /// Non-empty list of destination CRDs to write normalized events to.
    pub destinations: Vec<DestinationConfig>,

    /// Advisory pipeline-stage ordering.
    #[serde(default)]
    pub processing: ProcessingConfig,
}

/// The three adapter kinds an `Ingester` may drive.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IngesterKind {
    Informer,
    Webhook,
    Logs,
}

/// `informer` adapter configuration: a single GVR, optional scoping.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InformerConfig {
    pub group: String,
    pub version: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_selector: Option<String>,
    /// Duration string (e.g. `"10m"`), parsed with `humantime`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resync_period: Option<String>,
}

/// `webhook` adapter configuration: a push path plus optional auth.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<WebhookAuth>,
}

/// Webhook authentication, one of bearer-token or HTTP basic, both backed by
/// a referenced `Secret`.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WebhookAuth {
    Bearer { secret_name: String },
    Basic { secret_name: String },
}

/// `logs` adapter configuration: pod selection plus ordered regex patterns.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogsConfig {
    pub label_selector: String,
    pub patterns: Vec<LogPattern>,
}

/// A single log-line pattern: first match wins.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct LogPattern {
    pub regex: String,
    #[serde(rename = "type")]
    pub event_type: String,
}

/// Admission filtering: either the legacy list-predicate fields or an
/// `expression` string. `expression` wins when both are set (§4.2).
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_severity: Option<super::observation::Severity>,
    #[serde(default)]
    pub include_namespaces: Vec<String>,
    #[serde(default)]
    pub exclude_namespaces: Vec<String>,
    #[serde(default)]
    pub include_types: Vec<String>,
    #[serde(default)]
    pub exclude_types: Vec<String>,
}

/// Dedup strategy selection (§4.3).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum DedupStrategy {
    Fingerprint,
    Key,
    EventStream,
}

impl Default for DedupStrategy {
    fn default() -> Self {
        DedupStrategy::Fingerprint
    }
}

/// Deduplication configuration.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeduplicationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Duration string, e.g. `"24h"`. A window of `"0s"` disables dedup
    /// (every event admitted) per §8's boundary behavior.
    #[serde(default = "default_window")]
    pub window: String,
    #[serde(default)]
    pub strategy: DedupStrategy,
    /// User-declared key fields, required (and only meaningful) for the
    /// `key` strategy.
    #[serde(default)]
    pub fields: Vec<String>,
    /// Admission cap per window, required (and only meaningful) for the
    /// `event-stream` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events_per_window: Option<u32>,
}

fn default_window() -> String {
    "0s".to_string()
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window: default_window(),
            strategy: DedupStrategy::default(),
            fields: Vec::new(),
            max_events_per_window: None,
        }
    }
}

/// Maps a raw event onto an Observation spec.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NormalizationConfig {
    pub domain: super::observation::Category,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Source-native severity string → ordinal bucket.
    #[serde(default)]
    pub priority: BTreeMap<String, f64>,
    /// Explicit JSONPath-style field mappings, keyed by the Observation
    /// field they populate (`severity`, `resource.name`, `detectedAt`, ...).
    #[serde(default)]
    pub field_mappings: BTreeMap<String, String>,
    /// Subset of `details` fields considered "critical" for fingerprinting
    /// (§4.1).
    #[serde(default)]
    pub critical_fields: Vec<String>,
}

/// A single destination CRD this ingester writes normalized events to.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DestinationConfig {
    #[serde(rename = "type")]
    pub kind: DestinationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gvr: Option<ExplicitGvr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_creation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    Crd,
}

/// Explicit group/version/resource, used when `value` doesn't map onto the
/// `zen.kube-zen.io/v1/{value}` default.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct ExplicitGvr {
    pub group: String,
    pub version: String,
    pub resource: String,
}

/// Advisory filter/dedup stage ordering (§4.5). Both stages always run
/// regardless of this hint; it exists only to let an operator favor the
/// cheaper stage first for a given ingester's traffic shape.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingConfig {
    #[serde(default)]
    pub order: ProcessingOrder,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            order: ProcessingOrder::FilterFirst,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOrder {
    FilterFirst,
    DedupFirst,
}

impl Default for ProcessingOrder {
    fn default() -> Self {
        ProcessingOrder::FilterFirst
    }
}

/// Controller-written status subresource.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngesterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl DestinationConfig {
    /// Resolves the group/version/resource this destination targets,
    /// applying the `value` defaulting rules of §3.1: `observations`
    /// defaults to `zen.kube-zen.io/v1/observations`, any other value
    /// defaults to `zen.kube-zen.io/v1/{value}`.
    pub fn resolve_gvr(&self) -> ExplicitGvr {
        if let Some(gvr) = &self.gvr {
            return gvr.clone();
        }
        let resource = self.value.clone().unwrap_or_else(|| "observations".into());
        ExplicitGvr {
            group: "zen.kube-zen.io".into(),
            version: "v1".into(),
            resource,
        }
    }
}
