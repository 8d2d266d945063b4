//! Core types for the asset cache.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Binary media payload.
pub type Blob = Bytes;

/// Storage key for an asset URL.
///
/// SHA-256 of the URL, hex encoded: fixed length, filesystem safe and
/// deterministic across runs.
pub fn asset_key(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// Result from a cache lookup, including the tier that served it.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn new(data: T, source: CacheSource) -> Self {
    Self { data, source }
  }
}

/// Indicates which tier served an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// In-memory tier
  Memory,
  /// Persistent tier, promoted into memory on the way out
  Disk,
  /// Downloaded on a full miss
  Network,
}
