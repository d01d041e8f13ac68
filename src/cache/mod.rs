//! Per-cluster client cache
//!
//! The cache maps cluster names to live, authenticated [`Cluster`] handles.
//! The [`Server`] owns the registry and processes every operation through a
//! single ordered command stream, so concurrent callers never observe a torn
//! update and the "decide to replace" and "invalidate the old handle" steps
//! are atomic with respect to every other operation.
//!
//! Handles hand out a [`kube::Client`], its [`kube::Config`], and an
//! [`InformerFactory`] driving background watches against the target cluster.
//! Once a handle is superseded or removed, its accessors fail with
//! [`crate::Error::ClusterNotReady`] and its resources are released exactly
//! once.

mod cluster;
mod informers;
mod server;

pub use cluster::Cluster;
pub use informers::InformerFactory;
pub use server::Server;
