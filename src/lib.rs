//! Flotilla - per-cluster client cache for multi-cluster Kubernetes rollouts
//!
//! Rollout controllers in a multi-cluster orchestrator act against an
//! arbitrary, dynamically-changing set of target clusters. This crate is the
//! piece that hands every controller a live, authenticated API client for a
//! named cluster while clusters are added, removed, and have their
//! credentials rotated at runtime, and while many controller tasks read
//! concurrently.
//!
//! # Architecture
//!
//! - An external watcher observes cluster definitions and credential secrets,
//!   builds a [`cache::Cluster`] handle per target cluster, and drives the
//!   [`cache::Server`] via `store`/`remove`.
//! - Controllers call `fetch` to obtain the current handle for a name, then
//!   use its accessors when doing per-cluster work.
//! - When a cluster's credentials rotate, the superseded handle is
//!   invalidated: its accessors start failing with
//!   [`Error::ClusterNotReady`] and its background watch machinery is torn
//!   down exactly once. Holders discard the stale handle and re-fetch.
//!
//! The cache makes no scheduling or rollout decisions; it only answers "give
//! me a working client for cluster X, or tell me it is unavailable".
//!
//! # Modules
//!
//! - [`cache`] - The cluster registry ([`cache::Server`]) and the per-cluster
//!   handle ([`cache::Cluster`]) with its watch machinery
//!   ([`cache::InformerFactory`])
//! - [`checksum`] - Content checksums for credential secrets
//! - [`error`] - Error types for the cache

#![deny(missing_docs)]

pub mod cache;
pub mod checksum;
pub mod error;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
