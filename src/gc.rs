//! Garbage collector (C8, spec §4.8): periodic TTL sweep over Observation
//! CRs, leader-gated, paginated to avoid API bursts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::api::{Api, DeleteParams, ListParams};
use kube::Client;
use metrics::counter;
use tracing::{info, warn};

use crate::k8s::observation::Observation;
use crate::leader::LeaderHandle;

/// Default TTL applied when an Observation carries none (spec §4.8: "use a
/// configured default, e.g. 7 days").
const DEFAULT_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const MIN_TTL_SECONDS: i64 = 60;
const MAX_TTL_SECONDS: i64 = 31_536_000;
const PAGE_SIZE: u32 = 500;

pub struct GarbageCollector {
    client: Client,
    interval: Duration,
    leader: LeaderHandle,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SweepReport {
    pub scanned: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl GarbageCollector {
    pub fn new(client: Client, interval: Duration, leader: LeaderHandle) -> Self {
        Self {
            client,
            interval,
            leader,
        }
    }

    pub async fn run(self, cancel: tokio_util::sync::CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if !self.leader.is_leader() {
                        continue;
                    }
                    let report = self.sweep().await;
                    info!(
                        scanned = report.scanned,
                        deleted = report.deleted,
                        errors = report.errors,
                        "garbage collection sweep complete"
                    );
                }
            }
        }
    }

    /// Runs one full paginated sweep across all namespaces.
    pub async fn sweep(&self) -> SweepReport {
        let api: Api<Observation> = Api::all(self.client.clone());
        let mut report = SweepReport::default();
        let mut continue_token: Option<String> = None;

        loop {
            let mut lp = ListParams::default().limit(PAGE_SIZE);
            if let Some(token) = &continue_token {
                lp = lp.continue_token(token);
            }

            let page = match api.list(&lp).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, "[CRD_WRITE_ERROR] gc list failed");
                    report.errors += 1;
                    break;
                }
            };

            for obj in &page.items {
                report.scanned += 1;
                if self.is_expired(obj) {
                    match self.delete_one(obj).await {
                        Ok(()) => report.deleted += 1,
                        Err(_) => report.errors += 1,
                    }
                }
            }

            counter!("zen_watcher_gc_scanned_total").increment(page.items.len() as u64);

            continue_token = page.metadata.continue_.filter(|s| !s.is_empty());
            if continue_token.is_none() {
                break;
            }
        }

        counter!("zen_watcher_gc_deleted_total").increment(report.deleted);
        counter!("zen_watcher_gc_errors_total").increment(report.errors);
        report
    }

    fn is_expired(&self, obj: &Observation) -> bool {
        let Some(created_at) = obj.metadata.creation_timestamp.as_ref().map(|t| t.0) else {
            return false;
        };
        let ttl = clamp_ttl(obj.spec.ttl_seconds_after_creation.unwrap_or(DEFAULT_TTL_SECONDS));
        let deadline = created_at + chrono::Duration::seconds(ttl);
        Utc::now() > deadline
    }

    async fn delete_one(&self, obj: &Observation) -> Result<(), kube::Error> {
        let (Some(name), Some(namespace)) = (&obj.metadata.name, &obj.metadata.namespace) else {
            return Ok(());
        };
        let api: Api<Observation> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => {
                warn!(name, namespace, error = %e, "gc delete failed, will retry next cycle");
                Err(e)
            }
        }
    }
}

/// Re-clamps TTL at read time (spec §4.8: "out-of-range values are treated
/// as the clamped value"), independent of the write-time clamp in
/// [`crate::config::clamp_ttl_seconds`] so a value written before a bounds
/// change is still handled correctly.
fn clamp_ttl(seconds: i64) -> i64 {
    seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_ttl_enforces_bounds() {
        assert_eq!(clamp_ttl(0), MIN_TTL_SECONDS);
        assert_eq!(clamp_ttl(-10), MIN_TTL_SECONDS);
        assert_eq!(clamp_ttl(999_999_999), MAX_TTL_SECONDS);
        assert_eq!(clamp_ttl(3600), 3600);
    }
}
