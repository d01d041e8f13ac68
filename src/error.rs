//! Error types for the cluster client cache

use thiserror::Error;

/// Main error type for cluster cache operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The cluster handle has been superseded or removed
    ///
    /// Returned by every [`crate::cache::Cluster`] accessor once the handle
    /// has been invalidated. The caller should discard the handle and fetch
    /// the current one from the store.
    #[error("cluster {0} not ready: the handle has been invalidated")]
    ClusterNotReady(String),

    /// The store's command loop has shut down
    ///
    /// Returned by store operations issued after (or racing with) `stop`.
    #[error("cluster store has been stopped")]
    StoreStopped,
}

impl Error {
    /// Create a `ClusterNotReady` error for the given cluster
    pub fn cluster_not_ready(name: impl Into<String>) -> Self {
        Self::ClusterNotReady(name.into())
    }

    /// Check whether this error means the held handle is stale
    pub fn is_cluster_not_ready(&self) -> bool {
        matches!(self, Self::ClusterNotReady(_))
    }

    /// Check whether this error means the store has shut down
    pub fn is_store_stopped(&self) -> bool {
        matches!(self, Self::StoreStopped)
    }
}
