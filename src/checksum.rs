//! Content checksums for credential secrets
//!
//! The cache de-duplicates redundant updates by comparing an opaque checksum
//! of each cluster's identity-relevant content. Informer resyncs re-deliver
//! unchanged secrets; hashing the secret's data lets the watcher tell a real
//! credential rotation apart from a re-delivery without rebuilding the
//! per-cluster client and watch machinery.

use k8s_openapi::api::core::v1::Secret;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 checksum of a credential secret's data
///
/// Covers every key/value pair of `data`. The map is ordered by key, so two
/// secrets with the same content always produce the same checksum regardless
/// of how they were assembled. Keys and values are separated by NUL bytes so
/// adjacent entries cannot collide by shifting bytes between them.
pub fn secret_checksum(secret: &Secret) -> String {
    let mut hasher = Sha256::new();
    if let Some(data) = &secret.data {
        for (key, value) in data {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(&value.0);
            hasher.update([0u8]);
        }
    }
    format!("{:x}", hasher.finalize())
}
