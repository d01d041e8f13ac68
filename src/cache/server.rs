//! Cluster registry with a single-owner command loop
//!
//! The [`Server`] owns the name-to-handle registry exclusively. Rather than
//! guarding a shared map with a lock, every operation is a blocking round
//! trip through one ordered command stream, drained by a single worker
//! ([`Server::serve`]). That keeps "decide to replace" and "invalidate the
//! superseded handle" atomic with respect to every other lookup and
//! mutation, and extends cleanly if more command kinds are added later.
//!
//! Full serialization is fine here: cluster cardinality and churn are both
//! low. This is control-plane metadata, not a hot data path.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::Cluster;
use crate::error::Error;
use crate::Result;

enum Command {
    Store {
        cluster: Cluster,
        done: oneshot::Sender<()>,
    },
    Fetch {
        name: String,
        reply: oneshot::Sender<Option<Cluster>>,
    },
    Remove {
        name: String,
        done: oneshot::Sender<()>,
    },
    Count {
        reply: oneshot::Sender<usize>,
    },
}

/// Authoritative registry mapping cluster name to its current handle
///
/// Create once per process, run [`serve`](Self::serve) on a dedicated task,
/// and share via `Arc`. All data operations block only until their command
/// has been processed; per-caller program order is preserved.
pub struct Server {
    commands: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Create a new server with an empty registry
    pub fn new() -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        Self {
            commands,
            inbox: Mutex::new(Some(inbox)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Drain the command stream in arrival order until stopped
    ///
    /// Operations issued before `serve` starts queue up and are processed
    /// once it runs. On shutdown the queue is dropped, waking any still
    /// queued callers with [`Error::StoreStopped`], and every remaining
    /// registry entry is invalidated so its background resources are
    /// released. A second call returns immediately.
    pub async fn serve(&self) {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut inbox) = inbox else {
            debug!("cluster store is already being served");
            return;
        };

        let mut registry: HashMap<String, Cluster> = HashMap::new();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                command = inbox.recv() => match command {
                    Some(command) => apply(&mut registry, command),
                    None => break,
                },
            }
        }

        // Queued callers observe StoreStopped once their commands drop
        drop(inbox);

        info!(clusters = registry.len(), "cluster store shutting down");
        for (_, cluster) in registry.drain() {
            cluster.invalidate();
        }
    }

    /// Signal the command loop to stop; idempotent
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Insert, replace, or discard a cluster handle
    ///
    /// - No entry for the name: insert it.
    /// - Entry with the same checksum: the registry is untouched and the
    ///   newcomer is discarded (and invalidated, so its never-published
    ///   resources are released). This makes `store` idempotent against
    ///   informer resyncs re-delivering unchanged objects.
    /// - Entry with a different checksum: the newcomer replaces it and the
    ///   superseded handle is invalidated.
    pub async fn store(&self, cluster: Cluster) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Store { cluster, done })
            .map_err(|_| Error::StoreStopped)?;
        done_rx.await.map_err(|_| Error::StoreStopped)
    }

    /// Current handle for the name, or `None` if the store has never heard
    /// of it (or it has been removed)
    ///
    /// The handle is consistent with the registry at the moment of lookup
    /// and carries no freshness guarantee beyond that: a later `store` or
    /// `remove` may invalidate it at any time.
    pub async fn fetch(&self, name: &str) -> Result<Option<Cluster>> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Fetch {
                name: name.to_owned(),
                reply,
            })
            .map_err(|_| Error::StoreStopped)?;
        reply_rx.await.map_err(|_| Error::StoreStopped)
    }

    /// Delete the entry for the name and invalidate its handle
    ///
    /// Removing an absent name is a no-op.
    pub async fn remove(&self, name: &str) -> Result<()> {
        let (done, done_rx) = oneshot::channel();
        self.commands
            .send(Command::Remove {
                name: name.to_owned(),
                done,
            })
            .map_err(|_| Error::StoreStopped)?;
        done_rx.await.map_err(|_| Error::StoreStopped)
    }

    /// Number of clusters currently in the registry
    pub async fn count(&self) -> Result<usize> {
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Count { reply })
            .map_err(|_| Error::StoreStopped)?;
        reply_rx.await.map_err(|_| Error::StoreStopped)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(registry: &mut HashMap<String, Cluster>, command: Command) {
    match command {
        Command::Store { cluster, done } => {
            store_cluster(registry, cluster);
            let _ = done.send(());
        }
        Command::Fetch { name, reply } => {
            let _ = reply.send(registry.get(&name).cloned());
        }
        Command::Remove { name, done } => {
            if let Some(cluster) = registry.remove(&name) {
                info!(cluster = %name, "cluster removed from store");
                cluster.invalidate();
            } else {
                debug!(cluster = %name, "removing unknown cluster is a no-op");
            }
            let _ = done.send(());
        }
        Command::Count { reply } => {
            let _ = reply.send(registry.len());
        }
    }
}

fn store_cluster(registry: &mut HashMap<String, Cluster>, cluster: Cluster) {
    let name = cluster.name().to_owned();

    let unchanged = registry
        .get(&name)
        .is_some_and(|existing| existing.raw_checksum() == cluster.raw_checksum());
    if unchanged {
        debug!(cluster = %name, "checksum unchanged, discarding redundant update");
        cluster.invalidate();
        return;
    }

    match registry.insert(name.clone(), cluster) {
        Some(superseded) => {
            info!(cluster = %name, "cluster credentials changed, replacing handle");
            superseded.invalidate();
        }
        None => {
            info!(cluster = %name, "cluster added to store");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use kube::{Client, Config};

    use crate::cache::InformerFactory;

    use super::*;

    fn test_cluster(name: &str, checksum: &str) -> Cluster {
        let config = Config::new(http::Uri::from_static("http://127.0.0.1:6443"));
        let client = Client::try_from(config.clone()).expect("offline client construction");
        let informers = InformerFactory::new(client.clone());
        Cluster::new(name, checksum, client, config, informers, || {})
    }

    fn spawn_server() -> (Arc<Server>, tokio::task::JoinHandle<()>) {
        let server = Arc::new(Server::new());
        let worker = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.serve().await }
        });
        (server, worker)
    }

    #[tokio::test]
    async fn test_store_then_fetch() {
        let (server, worker) = spawn_server();

        let expected = test_cluster("test-cluster", "test-checksum");
        server.store(expected.clone()).await.unwrap();

        let fetched = server.fetch("test-cluster").await.unwrap();
        assert_eq!(fetched, Some(expected));

        server.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_fetch_unknown_is_absent_not_an_error() {
        let (server, worker) = spawn_server();

        assert_eq!(server.fetch("never-stored").await.unwrap(), None);

        server.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_serve_twice_is_a_no_op() {
        let (server, worker) = spawn_server();

        // A completed round trip proves the worker owns the inbox
        assert_eq!(server.count().await.unwrap(), 0);

        // The second serve call must return instead of stealing the inbox
        server.serve().await;

        server.store(test_cluster("test-cluster", "x")).await.unwrap();
        assert_eq!(server.count().await.unwrap(), 1);

        server.stop();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_invalidates_remaining_entries() {
        let (server, worker) = spawn_server();

        let releases = Arc::new(AtomicUsize::new(0));
        let config = Config::new(http::Uri::from_static("http://127.0.0.1:6443"));
        let client = Client::try_from(config.clone()).expect("offline client construction");
        let informers = InformerFactory::new(client.clone());
        let counter = Arc::clone(&releases);
        let cluster = Cluster::new("test-cluster", "x", client, config, informers, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        server.store(cluster.clone()).await.unwrap();
        server.stop();
        worker.await.unwrap();

        assert!(!cluster.is_ready());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (server, worker) = spawn_server();

        server.stop();
        server.stop();
        worker.await.unwrap();

        assert!(matches!(
            server.count().await,
            Err(Error::StoreStopped)
        ));
    }
}
