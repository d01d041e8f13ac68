//! Background watch machinery for a cluster handle
//!
//! Controllers reconciling against a target cluster want cheap, local reads
//! of that cluster's objects instead of hitting its API server on every
//! pass. The [`InformerFactory`] provides that: one watcher-plus-reflector
//! task per resource type, started lazily on first request and shared by
//! every caller asking for the same type.
//!
//! The factory is the expensive per-cluster resource the cache exists to
//! avoid rebuilding on redundant updates. Its [`shutdown`] is what a
//! handle's release action runs when the handle is invalidated.
//!
//! [`shutdown`]: InformerFactory::shutdown

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::reflector;
use kube::runtime::reflector::Store;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Lazily-started shared watch caches for one target cluster
///
/// Cloning is cheap and shares the underlying factory.
#[derive(Clone)]
pub struct InformerFactory {
    inner: Arc<Inner>,
}

struct Inner {
    client: Client,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    readers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    tasks: Vec<JoinHandle<()>>,
    shut_down: bool,
}

impl InformerFactory {
    /// Create a factory for the given cluster client
    ///
    /// No watches start until a type is first requested.
    pub fn new(client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Shared reflector store for `K` objects on this cluster
    ///
    /// The first call for a given type spawns the backing watch task; later
    /// calls return the same shared reader. Namespaced types are watched
    /// across all namespaces. After [`shutdown`](Self::shutdown) this hands
    /// out an inert, permanently-empty store rather than starting new
    /// watches.
    pub fn store<K>(&self) -> Store<K>
    where
        K: Resource<DynamicType = ()>
            + Clone
            + DeserializeOwned
            + fmt::Debug
            + Send
            + Sync
            + 'static,
    {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(reader) = state
            .readers
            .get(&TypeId::of::<K>())
            .and_then(|any| any.downcast_ref::<Store<K>>())
        {
            return reader.clone();
        }

        let (reader, writer) = reflector::store::<K>();
        if state.shut_down {
            debug!("informer factory is shut down, handing out inert store");
            return reader;
        }

        let api: Api<K> = Api::all(self.inner.client.clone());
        let stream = watcher(api, watcher::Config::default()).default_backoff();
        let mut events = Box::pin(reflector(writer, stream));
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(error) = event {
                    warn!(error = %error, "watch stream error, backing off");
                }
            }
        });

        state.tasks.push(task);
        state.readers.insert(TypeId::of::<K>(), Box::new(reader.clone()));
        reader
    }

    /// Number of live watch tasks
    pub fn active_watches(&self) -> usize {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    /// Abort every watch task and drop the cached readers; idempotent
    pub fn shutdown(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.shut_down {
            return;
        }
        state.shut_down = true;
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.readers.clear();
        debug!("informer factory shut down");
    }
}

impl fmt::Debug for InformerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("InformerFactory")
            .field("active_watches", &state.tasks.len())
            .field("shut_down", &state.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use kube::Config;

    use super::*;

    fn test_factory() -> InformerFactory {
        let config = Config::new(http::Uri::from_static("http://127.0.0.1:6443"));
        let client = Client::try_from(config).expect("offline client construction");
        InformerFactory::new(client)
    }

    #[tokio::test]
    async fn test_one_watch_per_type() {
        let factory = test_factory();
        assert_eq!(factory.active_watches(), 0);

        let first = factory.store::<ConfigMap>();
        let second = factory.store::<ConfigMap>();
        assert_eq!(factory.active_watches(), 1);

        // Both readers see the same (empty, unreachable-cluster) cache
        assert!(first.state().is_empty());
        assert!(second.state().is_empty());

        factory.store::<Secret>();
        assert_eq!(factory.active_watches(), 2);

        factory.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_aborts_watches_and_is_idempotent() {
        let factory = test_factory();
        factory.store::<ConfigMap>();
        factory.store::<Secret>();
        assert_eq!(factory.active_watches(), 2);

        factory.shutdown();
        assert_eq!(factory.active_watches(), 0);

        factory.shutdown();
        assert_eq!(factory.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_store_after_shutdown_is_inert() {
        let factory = test_factory();
        factory.shutdown();

        let reader = factory.store::<ConfigMap>();
        assert!(reader.state().is_empty());
        assert_eq!(factory.active_watches(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_watches() {
        let factory = test_factory();
        let clone = factory.clone();

        factory.store::<ConfigMap>();
        assert_eq!(clone.active_watches(), 1);

        clone.shutdown();
        assert_eq!(factory.active_watches(), 0);
    }
}
