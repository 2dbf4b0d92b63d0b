//! Secret cache for webhook authentication (spec §4.11): fetched from the
//! Kubernetes API on demand with a small positive cache, TTL on the order
//! of minutes.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use snafu::OptionExt;

use crate::error::{self, Error};

const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone)]
struct CachedSecret {
    data: BTreeMap<String, Vec<u8>>,
    fetched_at: Instant,
}

/// Caches decoded `Secret.data` maps keyed by `namespace/name`. A miss is a
/// hard error for the caller (spec §4.11: "a missing secret is a hard 500").
pub struct SecretCache {
    client: Client,
    ttl: Duration,
    entries: DashMap<String, CachedSecret>,
}

impl SecretCache {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            ttl: DEFAULT_TTL,
            entries: DashMap::new(),
        }
    }

    /// Returns the value at `key` within the named Secret in `namespace`,
    /// fetching and caching the whole Secret on a cache miss or expiry.
    pub async fn get(&self, namespace: &str, name: &str, key: &str) -> Result<Vec<u8>, Error> {
        let cache_key = format!("{namespace}/{name}");

        if let Some(entry) = self.entries.get(&cache_key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return entry
                    .data
                    .get(key)
                    .cloned()
                    .context(error::ConfigSnafu {
                        source_name: name.to_string(),
                        reason: format!("secret {namespace}/{name} has no key {key}"),
                    });
            }
        }

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await.map_err(|source| Error::Config {
            source_name: name.to_string(),
            reason: format!("failed to fetch secret {namespace}/{name}: {source}"),
        })?;

        let data: BTreeMap<String, Vec<u8>> = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, v.0))
            .collect();

        let value = data.get(key).cloned();
        self.entries.insert(
            cache_key,
            CachedSecret {
                data,
                fetched_at: Instant::now(),
            },
        );

        value.context(error::ConfigSnafu {
            source_name: name.to_string(),
            reason: format!("secret {namespace}/{name} has no key {key}"),
        })
    }

    pub fn invalidate(&self, namespace: &str, name: &str) {
        self.entries.remove(&format!("{namespace}/{name}"));
    }
}
