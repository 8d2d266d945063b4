//! Two-tier cache for binary media assets.
//!
//! - Memory tier: moka, bounded by entry count and byte budget
//! - Persistent tier: flat directory of JPEG files, evicted oldest-first once
//!   over its byte ceiling
//! - Keys are the SHA-256 of the asset URL

mod layer;
mod storage;
mod traits;

pub use layer::AssetCache;
pub use storage::{encode_jpeg, plan_evictions, DiskEntry, DiskStorage, EvictionReport};
pub use traits::{asset_key, Blob, CacheResult, CacheSource};

#[cfg(test)]
pub(crate) use storage::tests as storage_tests;
