//! Cache keys for job deduplication.
//!
//! A key is the Blake3 hash of the function name, the canonical JSON
//! encoding of the kwargs, and the options that change what gets computed.
//! `serde_json::Map` keeps its keys sorted, so two kwargs maps with the same
//! entries encode identically regardless of insertion order.

use serde::{Serialize, Serializer};

use crate::job::{JobOpts, Kwargs};

/// A 32-byte job cache key (Blake3 hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey(pub [u8; 32]);

impl JobKey {
    /// Derive the key for a request.
    ///
    /// Only the pool selection participates from `opts`: client caching and
    /// wait semantics change how a job is delivered, not what it computes.
    pub fn derive(function_name: &str, kwargs: &Kwargs, opts: &JobOpts) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(function_name.as_bytes());
        hasher.update(b":");
        // Encoding a Map of JSON values cannot fail.
        let encoded = serde_json::to_vec(kwargs).unwrap_or_default();
        hasher.update(&encoded);
        hasher.update(b":");
        if let Some(pool) = &opts.pool {
            hasher.update(pool.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form for logs
        write!(f, "{}", &self.to_hex()[..12])
    }
}

impl Serialize for JobKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}
