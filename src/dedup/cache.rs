//! The dedup cache itself: a sharded, reader-writer-friendly map plus a
//! background sweep, matching spec §4.3 and §5's "read-heavy workloads must
//! not serialize on writers" requirement.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::event::RawEvent;
use crate::fingerprint::{self, Fingerprint};
use crate::k8s::ingester::{DedupStrategy, DeduplicationConfig, NormalizationConfig};
use crate::normalize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Admitted,
    Duplicate,
}

#[derive(Debug, Clone)]
struct DedupEntry {
    last_admitted: DateTime<Utc>,
    window_start: DateTime<Utc>,
    count_in_window: u32,
}

/// Default bound on entries per ingester, evicted oldest-admitted-first
/// when exceeded (spec §4.3: "a fixed maximum entry count").
const DEFAULT_MAX_ENTRIES: usize = 8192;

/// A dedup cache for exactly one ingester's pipeline.
pub struct DedupCache {
    entries: DashMap<String, DedupEntry>,
    insertion_order: Mutex<VecDeque<String>>,
    max_entries: usize,
    enabled: bool,
    window: chrono::Duration,
    strategy: DedupStrategy,
    fields: Vec<String>,
    max_events_per_window: u32,
}

impl DedupCache {
    pub fn new(config: &DeduplicationConfig) -> Self {
        let window = humantime::parse_duration(&config.window)
            .map(|d| chrono::Duration::from_std(d).unwrap_or_default())
            .unwrap_or_default();
        Self {
            entries: DashMap::new(),
            insertion_order: Mutex::new(VecDeque::new()),
            max_entries: DEFAULT_MAX_ENTRIES,
            enabled: config.enabled,
            window,
            strategy: config.strategy,
            fields: config.fields.clone(),
            max_events_per_window: config.max_events_per_window.unwrap_or(u32::MAX),
        }
    }

    /// Computes the dedup key for `raw` under this cache's configured
    /// strategy and checks admission, recording the admission if it
    /// passes. `enabled: false` or a `window` of zero both disable dedup
    /// entirely (spec §8 boundary behavior): every event is admitted and
    /// nothing is recorded.
    pub fn check_and_record(&self, raw: &RawEvent, norm: &NormalizationConfig) -> DedupOutcome {
        if !self.enabled || self.window.is_zero() {
            return DedupOutcome::Admitted;
        }

        let key = self.compute_key(raw, norm);
        let now = Utc::now();

        let mut is_new_key = false;
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            is_new_key = true;
            DedupEntry {
                last_admitted: now,
                window_start: now,
                count_in_window: 0,
            }
        });

        let within_window = now.signed_duration_since(entry.window_start) < self.window;

        let admitted = match self.strategy {
            DedupStrategy::Fingerprint | DedupStrategy::Key => {
                let is_new = entry.count_in_window == 0;
                if is_new || !within_window {
                    entry.window_start = now;
                    entry.count_in_window = 1;
                    entry.last_admitted = now;
                    true
                } else {
                    false
                }
            }
            DedupStrategy::EventStream => {
                if !within_window {
                    entry.window_start = now;
                    entry.count_in_window = 1;
                    entry.last_admitted = now;
                    true
                } else if entry.count_in_window < self.max_events_per_window {
                    entry.count_in_window += 1;
                    entry.last_admitted = now;
                    true
                } else {
                    false
                }
            }
        };
        drop(entry);

        if is_new_key {
            self.record_insertion(key);
        }

        if admitted {
            DedupOutcome::Admitted
        } else {
            DedupOutcome::Duplicate
        }
    }

    fn compute_key(&self, raw: &RawEvent, norm: &NormalizationConfig) -> String {
        match self.strategy {
            DedupStrategy::Key => self
                .fields
                .iter()
                .map(|f| crate::path::extract_str(&raw.payload, f).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("|"),
            DedupStrategy::Fingerprint | DedupStrategy::EventStream => {
                let resolved = normalize::resolve_fields(raw, norm);
                let fp: Fingerprint = fingerprint::compute(
                    &raw.source,
                    norm.domain,
                    resolved.severity.unwrap_or(crate::k8s::observation::Severity::Info),
                    &resolved.event_type,
                    resolved.resource.as_ref(),
                    Some(&raw.payload),
                    &norm.critical_fields,
                );
                fp.to_string()
            }
        }
    }

    fn record_insertion(&self, key: String) {
        let mut order = self.insertion_order.lock().unwrap();
        order.push_back(key);
        while order.len() > self.max_entries {
            if let Some(oldest) = order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    /// Removes entries whose age exceeds the window. Intended to run every
    /// few seconds from a background task (spec §4.3).
    pub fn sweep(&self) {
        if self.window.is_zero() {
            return;
        }
        let now = Utc::now();
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.last_admitted) < self.window);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Spawns the periodic sweep task for `cache`, returning its handle so the
/// owning pipeline can abort it on shutdown.
pub fn spawn_sweeper(cache: std::sync::Arc<DedupCache>, interval: StdDuration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            cache.sweep();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn norm() -> NormalizationConfig {
        NormalizationConfig {
            domain: crate::k8s::observation::Category::Security,
            event_type: "t".into(),
            priority: Default::default(),
            field_mappings: Default::default(),
            critical_fields: vec![],
        }
    }

    #[test]
    fn fingerprint_strategy_suppresses_duplicate_within_window() {
        let config = DeduplicationConfig {
            enabled: true,
            window: "1h".to_string(),
            strategy: DedupStrategy::Fingerprint,
            fields: vec![],
            max_events_per_window: None,
        };
        let cache = DedupCache::new(&config);
        let raw = RawEvent::new("trivy", json!({"a": 1}));
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Admitted);
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Duplicate);
    }

    #[test]
    fn zero_window_disables_dedup() {
        let config = DeduplicationConfig {
            enabled: true,
            window: "0s".to_string(),
            strategy: DedupStrategy::Fingerprint,
            fields: vec![],
            max_events_per_window: None,
        };
        let cache = DedupCache::new(&config);
        let raw = RawEvent::new("trivy", json!({"a": 1}));
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Admitted);
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Admitted);
    }

    #[test]
    fn disabled_flag_disables_dedup_even_with_nonzero_window() {
        let config = DeduplicationConfig {
            enabled: false,
            window: "1h".to_string(),
            strategy: DedupStrategy::Fingerprint,
            fields: vec![],
            max_events_per_window: None,
        };
        let cache = DedupCache::new(&config);
        let raw = RawEvent::new("trivy", json!({"a": 1}));
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Admitted);
        assert_eq!(cache.check_and_record(&raw, &norm()), DedupOutcome::Admitted);
    }

    #[test]
    fn repeat_admissions_of_one_key_do_not_evict_it() {
        let config = DeduplicationConfig {
            enabled: true,
            window: "1h".to_string(),
            strategy: DedupStrategy::EventStream,
            fields: vec![],
            max_events_per_window: Some(u32::MAX),
        };
        let cache = DedupCache::new(&config);
        let raw = RawEvent::new("falco", json!({"a": 1}));
        for _ in 0..(DEFAULT_MAX_ENTRIES * 2) {
            cache.check_and_record(&raw, &norm());
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn event_stream_admits_up_to_max_then_drops() {
        let config = DeduplicationConfig {
            enabled: true,
            window: "5m".to_string(),
            strategy: DedupStrategy::EventStream,
            fields: vec![],
            max_events_per_window: Some(3),
        };
        let cache = DedupCache::new(&config);
        let raw = RawEvent::new("falco", json!({"a": 1}));
        let mut admitted = 0;
        for _ in 0..10 {
            if cache.check_and_record(&raw, &norm()) == DedupOutcome::Admitted {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3);
    }

    #[test]
    fn key_strategy_uses_declared_fields() {
        let config = DeduplicationConfig {
            enabled: true,
            window: "1h".to_string(),
            strategy: DedupStrategy::Key,
            fields: vec!["kind".to_string(), "name".to_string()],
            max_events_per_window: None,
        };
        let cache = DedupCache::new(&config);
        let a = RawEvent::new("src", json!({"kind": "Pod", "name": "x"}));
        let b = RawEvent::new("src", json!({"kind": "Pod", "name": "y"}));
        assert_eq!(cache.check_and_record(&a, &norm()), DedupOutcome::Admitted);
        assert_eq!(cache.check_and_record(&b, &norm()), DedupOutcome::Admitted);
        assert_eq!(cache.check_and_record(&a, &norm()), DedupOutcome::Duplicate);
    }
}
