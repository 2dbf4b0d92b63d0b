//! Shared Kubernetes client bootstrap (C12).

use kube::Client;
use snafu::ResultExt;

use crate::error::{self, Error};

/// Bundle of clients the rest of the engine shares: a typed client for
/// well-known kinds plus dynamic-API access for arbitrary destination GVRs.
///
/// Cloning a [`ClientSet`] is cheap: `kube::Client` is an `Arc`-backed
/// handle, the same way the teacher's own client wrappers are passed around
/// by value across tasks.
#[derive(Clone)]
pub struct ClientSet {
    client: Client,
}

impl ClientSet {
    /// Builds a client from the in-cluster service account, falling back to
    /// the local kubeconfig for development, matching `kube::Client::try_default`'s
    /// own resolution order.
    pub async fn bootstrap() -> Result<Self, Error> {
        let client = Client::try_default()
            .await
            .map_err(|source| Error::Kube { source })?;
        Ok(Self { client })
    }

    /// Returns the underlying typed/dynamic client handle.
    pub fn inner(&self) -> Client {
        self.client.clone()
    }

    /// Verifies the API server is reachable by hitting the discovery
    /// endpoint. Used by `/readyz` and by startup's fatal-config-error path
    /// (spec §6 exit codes).
    pub async fn check_connectivity(&self) -> Result<(), Error> {
        self.client
            .apiserver_version()
            .await
            .context(error::KubeSnafu)?;
        Ok(())
    }
}
