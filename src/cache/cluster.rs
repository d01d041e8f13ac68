//! Per-cluster client handle
//!
//! A [`Cluster`] bundles everything a controller needs to act against one
//! target cluster: its identity, a content checksum for de-duplication, an
//! authenticated client, the connection parameters the client was built
//! from, and the background watch machinery.
//!
//! A handle starts `Ready` and can only move one way, to `Invalidated`, when
//! the store supersedes or removes it. Holders may keep a clone of the
//! handle indefinitely, but must re-check liveness on every use: each
//! accessor fails with [`Error::ClusterNotReady`] once the handle has been
//! invalidated, and the correct reaction is to discard the handle and fetch
//! the current one.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use kube::{Client, Config};
use tracing::debug;

use super::InformerFactory;
use crate::error::Error;
use crate::Result;

/// Teardown action bound at construction, invoked exactly once on invalidation
type ReleaseFn = Box<dyn FnOnce() + Send + 'static>;

/// Handle to one target cluster's client, connection parameters, and
/// background watch machinery
///
/// Cloning is cheap and shares the underlying handle: all clones invalidate
/// together. Equality compares handle identity, not content, so a caller can
/// tell whether two fetches returned the same handle.
#[derive(Clone)]
pub struct Cluster {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    checksum: String,
    client: Client,
    config: Config,
    informers: InformerFactory,
    ready: AtomicBool,
    release: Mutex<Option<ReleaseFn>>,
}

impl Cluster {
    /// Create a new handle in the `Ready` state
    ///
    /// `release` is the teardown action for this handle's background
    /// resources. It runs exactly once, on the first successful
    /// [`invalidate`](Self::invalidate) transition, no matter how many
    /// callers race to trigger it.
    pub fn new(
        name: impl Into<String>,
        checksum: impl Into<String>,
        client: Client,
        config: Config,
        informers: InformerFactory,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                checksum: checksum.into(),
                client,
                config,
                informers,
                ready: AtomicBool::new(true),
                release: Mutex::new(Some(Box::new(release))),
            }),
        }
    }

    /// The cluster's name, its identity key in the store
    ///
    /// Identity stays readable after invalidation so callers can log which
    /// cluster a stale handle belonged to.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the handle is still the current one for its cluster
    ///
    /// Only a snapshot: the handle may be invalidated immediately after this
    /// returns true. Accessors re-check on every call.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    /// The content checksum of the cluster's identity-relevant data
    pub fn checksum(&self) -> Result<String> {
        self.ensure_ready()?;
        Ok(self.inner.checksum.clone())
    }

    /// The authenticated API client for this cluster
    pub fn client(&self) -> Result<Client> {
        self.ensure_ready()?;
        Ok(self.inner.client.clone())
    }

    /// The connection parameters the client was built from
    pub fn config(&self) -> Result<Config> {
        self.ensure_ready()?;
        Ok(self.inner.config.clone())
    }

    /// The shared watch caches for this cluster
    pub fn informers(&self) -> Result<InformerFactory> {
        self.ensure_ready()?;
        Ok(self.inner.informers.clone())
    }

    /// Permanently invalidate the handle
    ///
    /// One-way and idempotent: the first caller to win the transition runs
    /// the release action; every other call, concurrent or later, is a
    /// no-op. Called by the store when the handle is superseded or removed;
    /// holders should not call this themselves, only discard the handle and
    /// re-fetch.
    pub fn invalidate(&self) {
        if self.inner.ready.swap(false, Ordering::AcqRel) {
            debug!(cluster = %self.inner.name, "cluster handle invalidated");
            let release = self
                .inner
                .release
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(release) = release {
                release();
            }
        }
    }

    /// Checksum access for the store's de-duplication, bypassing the
    /// readiness check (registry entries are always ready)
    pub(crate) fn raw_checksum(&self) -> &str {
        &self.inner.checksum
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::cluster_not_ready(&self.inner.name))
        }
    }
}

impl PartialEq for Cluster {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Cluster {}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("name", &self.inner.name)
            .field("checksum", &self.inner.checksum)
            .field("ready", &self.is_ready())
            .finish()
    }
}
