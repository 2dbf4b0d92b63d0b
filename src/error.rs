//! Error taxonomy shared across the engine.
//!
//! Every variant here corresponds to exactly one category in the error
//! taxonomy: it maps to a single log prefix and a single metric call site at
//! the point it is raised, never at a generic catch-all. See the module that
//! raises a given variant for the metric it increments.

use snafu::Snafu;

/// Top-level error type for the engine.
///
/// The taxonomy deliberately mirrors the categories an operator reasons
/// about when reading logs: `CONFIG_ERROR`, `FILTER_ERROR`, `DEDUP_ERROR`,
/// `NORMALIZE_ERROR`, `CRD_WRITE_ERROR` (subdivided), and `ADAPTER_ERROR`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// Malformed Ingester, missing secret, unparseable expression. Recovered
    /// locally: the adapter is not started and a status condition is set.
    #[snafu(display("[CONFIG_ERROR] ingester {source_name}: {reason}"))]
    Config { source_name: String, reason: String },

    /// Expression evaluation failure on an individual event.
    #[snafu(display("[FILTER_ERROR] ingester {source_name}: {reason}"))]
    Filter { source_name: String, reason: String },

    /// Cache corruption; should not occur. The event is conservatively
    /// admitted by the caller when this is raised.
    #[snafu(display("[DEDUP_ERROR] ingester {source_name}: {reason}"))]
    Dedup { source_name: String, reason: String },

    /// Required field missing during normalization.
    #[snafu(display("[NORMALIZE_ERROR] ingester {source_name}: missing_field {field}"))]
    Normalize { source_name: String, field: String },

    /// Destination write failed in a way that permission or policy rejected
    /// the request outright. Terminal.
    #[snafu(display("[CRD_WRITE_ERROR] not_allowed writing {gvr} for {source_name}: {reason}"))]
    CrdWriteNotAllowed {
        source_name: String,
        gvr: String,
        reason: String,
    },

    /// Destination write collided with an existing object. Terminal (the
    /// event has already been deduplicated upstream; a collision here means
    /// a race across replicas, not a bug).
    #[snafu(display("[CRD_WRITE_ERROR] conflict writing {gvr} for {source_name}"))]
    CrdWriteConflict { source_name: String, gvr: String },

    /// Transient API or network failure writing a destination object. May be
    /// retried.
    #[snafu(display("[CRD_WRITE_ERROR] failure writing {gvr} for {source_name}: {reason}"))]
    CrdWriteFailure {
        source_name: String,
        gvr: String,
        reason: String,
    },

    /// Producer-side failure: watch disconnect, log stream EOF. The adapter
    /// retries with backoff; the reconciler leaves it running.
    #[snafu(display("[ADAPTER_ERROR] ingester {source_name}: {reason}"))]
    Adapter { source_name: String, reason: String },

    /// Underlying Kubernetes API client error, wrapped for `?` ergonomics at
    /// call sites that don't need a more specific variant.
    #[snafu(display("kubernetes api error: {source}"))]
    Kube { source: kube::Error },
}

impl From<kube::Error> for Error {
    fn from(source: kube::Error) -> Self {
        Error::Kube { source }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
