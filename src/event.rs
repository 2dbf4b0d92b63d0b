//! The raw-event record (C1, spec §3.3): the uniform internal shape every
//! source adapter emits into its owning pipeline.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::k8s::observation::ResourceRef;

/// An in-memory record produced by exactly one source adapter and consumed
/// by exactly one pipeline instance. Never persisted, never serialized —
/// there is deliberately no `Serialize` impl here, matching spec §3.3's
/// framing of raw events as internal-only.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// The owning ingester's `source` label.
    pub source: String,
    pub received_at: DateTime<Utc>,
    /// The producer's native object, preserved verbatim.
    pub payload: Value,
    /// Pre-extracted fields the adapter could cheaply compute, used to
    /// speed up filtering and fingerprinting without re-walking `payload`.
    pub hint: EventHint,
}

/// Adapter-populated hints. Every field is optional: adapters fill in only
/// what they can derive cheaply, and the normalizer falls back to path
/// extraction on `payload` for anything left `None`.
#[derive(Debug, Clone, Default)]
pub struct EventHint {
    pub resource: Option<ResourceRef>,
    pub namespace: Option<String>,
    pub native_severity: Option<String>,
    pub event_type: Option<String>,
    pub detected_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    pub fn new(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            received_at: Utc::now(),
            payload,
            hint: EventHint::default(),
        }
    }

    pub fn with_hint(mut self, hint: EventHint) -> Self {
        self.hint = hint;
        self
    }
}
