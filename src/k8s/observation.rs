//! The `Observation` custom resource: the normalized output object (spec
//! §3.2).

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Generated wrapper struct `Observation` for [`ObservationSpec`].
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "zen.kube-zen.io",
    version = "v1",
    kind = "Observation",
    namespaced,
    status = "ObservationStatus",
    shortname = "obs"
)]
#[serde(rename_all = "camelCase")]
pub struct ObservationSpec {
    pub source: String,
    pub category: Category,
    pub severity: Severity,
    /// Pattern `[a-z0-9_]+`.
    pub event_type: String,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ResourceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Clamped to `[60, 31_536_000]` before being stamped onto the CR; see
    /// [`crate::config::clamp_ttl_seconds`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds_after_creation: Option<i64>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Compliance,
    Performance,
    Operations,
    Cost,
}

/// Severity ordinal per §4.2: `CRITICAL > HIGH > MEDIUM > LOW > UNKNOWN`, the
/// the spec's `info` level maps onto `UNKNOWN`'s ordinal slot.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parses the case-insensitive severity tokens used in filter
    /// expressions and legacy `minSeverity` fields (`CRITICAL`, `HIGH`,
    /// `MEDIUM`, `LOW`, `UNKNOWN`), returning `None` for anything else so
    /// the caller can raise an evaluation error rather than guess.
    pub fn parse_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Severity::Critical),
            "HIGH" => Some(Severity::High),
            "MEDIUM" => Some(Severity::Medium),
            "LOW" => Some(Severity::Low),
            "UNKNOWN" | "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Controller-written status; the core never writes this (spec §3.2).
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObservationStatus {
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<DateTime<Utc>>,
}
