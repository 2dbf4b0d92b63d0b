//! Deduplicator (C3, spec §4.3): a bounded, time-windowed suppression cache,
//! one instance per pipeline (never shared across ingesters, per spec §5).

mod cache;

pub use cache::{DedupCache, DedupOutcome};
