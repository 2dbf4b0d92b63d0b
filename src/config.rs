//! Runtime configuration (C14, spec §6): environment variables parsed once
//! at startup, with defaulting and clamping applied at this one boundary so
//! no downstream component ever sees an out-of-range value.

use std::net::SocketAddr;
use std::time::Duration;

use ipnet::IpNet;
use metrics::counter;
use snafu::OptionExt;
use tracing::warn;

use crate::error::{self, Error};

pub const MIN_TTL_SECONDS: i64 = 60;
pub const MAX_TTL_SECONDS: i64 = 31_536_000;
const DEFAULT_OBSERVATION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_RATE_LIMIT_PER_MIN: u32 = 100;
const DEFAULT_MAX_REQUEST_BYTES: usize = 1_048_576;
const DEFAULT_RECONCILE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LEASE_NAME: &str = "zen-watcher-leader";

/// Process-wide configuration, resolved once from the environment.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub pod_namespace: String,
    pub lease_name: String,
    pub observation_ttl_seconds: i64,
    pub gc_interval: Duration,
    pub webhook_rate_limit_per_min: u32,
    pub server_max_request_bytes: usize,
    pub trusted_proxy_cidrs: Vec<IpNet>,
    pub webhook_bind_addr: SocketAddr,
    pub metrics_bind_addr: SocketAddr,
    pub reconcile_drain_timeout: Duration,
    pub enable_pprof: bool,
    pub pprof_port: Option<u16>,
}

impl RuntimeConfig {
    /// Resolves configuration from the process environment. `POD_NAMESPACE`
    /// missing is a fatal config error at startup (spec §6 exit codes).
    pub fn from_env() -> Result<Self, Error> {
        let pod_namespace = std::env::var("POD_NAMESPACE")
            .ok()
            .context(error::ConfigSnafu {
                source_name: "runtime".to_string(),
                reason: "POD_NAMESPACE is required".to_string(),
            })?;

        let lease_name = std::env::var("LEADER_ELECTION_LEASE_NAME")
            .unwrap_or_else(|_| DEFAULT_LEASE_NAME.to_string());

        let observation_ttl_seconds = resolve_ttl_default();

        let gc_interval = std::env::var("GC_INTERVAL")
            .ok()
            .and_then(|s| humantime::parse_duration(&s).ok())
            .unwrap_or(DEFAULT_GC_INTERVAL);

        let webhook_rate_limit_per_min = std::env::var("WEBHOOK_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_PER_MIN);

        let server_max_request_bytes = std::env::var("SERVER_MAX_REQUEST_BYTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_REQUEST_BYTES);

        let trusted_proxy_cidrs = std::env::var("TRUSTED_PROXY_CIDRS")
            .ok()
            .map(|s| {
                s.split(',')
                    .filter(|s| !s.trim().is_empty())
                    .filter_map(|s| s.trim().parse::<IpNet>().ok())
                    .collect()
            })
            .unwrap_or_default();

        let webhook_bind_addr = std::env::var("WEBHOOK_BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "0.0.0.0:8080".parse().unwrap());

        let metrics_bind_addr = std::env::var("METRICS_BIND_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "0.0.0.0:9090".parse().unwrap());

        let reconcile_drain_timeout = std::env::var("RECONCILE_DRAIN_TIMEOUT")
            .ok()
            .and_then(|s| humantime::parse_duration(&s).ok())
            .unwrap_or(DEFAULT_RECONCILE_DRAIN_TIMEOUT);

        let enable_pprof = std::env::var("ENABLE_PPROF")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let pprof_port = std::env::var("PPROF_PORT").ok().and_then(|s| s.parse().ok());
        if enable_pprof {
            warn!("ENABLE_PPROF set but profiling is not wired into this build; ignoring");
        }

        Ok(Self {
            pod_namespace,
            lease_name,
            observation_ttl_seconds,
            gc_interval,
            webhook_rate_limit_per_min,
            server_max_request_bytes,
            trusted_proxy_cidrs,
            webhook_bind_addr,
            metrics_bind_addr,
            reconcile_drain_timeout,
            enable_pprof,
            pprof_port,
        })
    }
}

fn resolve_ttl_default() -> i64 {
    if let Ok(seconds) = std::env::var("OBSERVATION_TTL_SECONDS") {
        if let Ok(parsed) = seconds.parse::<i64>() {
            return clamp_ttl_seconds(parsed, "OBSERVATION_TTL_SECONDS");
        }
    }
    if let Ok(days) = std::env::var("OBSERVATION_TTL_DAYS") {
        if let Ok(parsed) = days.parse::<i64>() {
            return clamp_ttl_seconds(parsed * 24 * 60 * 60, "OBSERVATION_TTL_DAYS");
        }
    }
    DEFAULT_OBSERVATION_TTL_SECONDS
}

/// Clamps a user-supplied TTL into `[60, 31_536_000]`, warning and
/// incrementing a metric when the input was out of range (spec §3.5, §8
/// boundary behavior: "0 or negative in input → clamped to 60 with a
/// warning metric").
pub fn clamp_ttl_seconds(seconds: i64, origin: &str) -> i64 {
    let clamped = seconds.clamp(MIN_TTL_SECONDS, MAX_TTL_SECONDS);
    if clamped != seconds {
        warn!(origin, requested = seconds, clamped, "ttlSecondsAfterCreation clamped to bounds");
        counter!("zen_watcher_ttl_clamped_total", "origin" => origin.to_string()).increment(1);
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_ttl_seconds_enforces_minimum() {
        assert_eq!(clamp_ttl_seconds(0, "test"), MIN_TTL_SECONDS);
        assert_eq!(clamp_ttl_seconds(-5, "test"), MIN_TTL_SECONDS);
    }

    #[test]
    fn clamp_ttl_seconds_enforces_maximum() {
        assert_eq!(clamp_ttl_seconds(i64::MAX, "test"), MAX_TTL_SECONDS);
    }

    #[test]
    fn clamp_ttl_seconds_passes_through_valid_values() {
        assert_eq!(clamp_ttl_seconds(3600, "test"), 3600);
    }

    proptest::proptest! {
        #[test]
        fn clamp_ttl_seconds_is_always_in_bounds(seconds: i64) {
            let clamped = clamp_ttl_seconds(seconds, "prop");
            proptest::prop_assert!((MIN_TTL_SECONDS..=MAX_TTL_SECONDS).contains(&clamped));
        }

        #[test]
        fn clamp_ttl_seconds_is_idempotent(seconds: i64) {
            let once = clamp_ttl_seconds(seconds, "prop");
            let twice = clamp_ttl_seconds(once, "prop");
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
