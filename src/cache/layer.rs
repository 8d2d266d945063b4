//! Two-tier asset cache: moka in memory over a size-capped directory.

use color_eyre::{eyre::eyre, Result};
use moka::future::Cache;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::storage::DiskStorage;
use super::traits::{asset_key, Blob, CacheResult, CacheSource};
use crate::config::AssetsConfig;
use crate::http::HttpTransport;

/// Cache for binary media keyed by source URL.
///
/// Lookups and downloads never fail loudly: anything that goes wrong is
/// logged and reported as `None`, which callers treat as "not available".
#[derive(Clone)]
pub struct AssetCache {
  memory: Cache<String, Blob>,
  disk: Arc<DiskStorage>,
  transport: Arc<dyn HttpTransport>,
}

impl AssetCache {
  /// Create an asset cache with the given limits and download transport.
  pub fn new(config: &AssetsConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
    let dir = config.directory()?;
    let disk = DiskStorage::open(&dir, config.disk_max_bytes, config.jpeg_quality)
      .map_err(|e| eyre!("Failed to open asset cache at {}: {}", dir.display(), e))?;

    Ok(Self::from_parts(
      memory_tier(config.memory_max_entries, config.memory_max_bytes),
      disk,
      transport,
    ))
  }

  fn from_parts(
    memory: Cache<String, Blob>,
    disk: DiskStorage,
    transport: Arc<dyn HttpTransport>,
  ) -> Self {
    Self {
      memory,
      disk: Arc::new(disk),
      transport,
    }
  }

  /// Directory backing the persistent tier.
  pub fn directory(&self) -> &Path {
    self.disk.dir()
  }

  /// Look up `url`, reporting which tier answered.
  ///
  /// A persistent hit is promoted into memory.
  pub async fn lookup(&self, url: &str) -> Option<CacheResult<Blob>> {
    let key = asset_key(url);

    if let Some(blob) = self.memory.get(&key).await {
      debug!(url, "Asset memory hit");
      return Some(CacheResult::new(blob, CacheSource::Memory));
    }

    let disk = Arc::clone(&self.disk);
    let read_key = key.clone();
    let bytes = match tokio::task::spawn_blocking(move || disk.read(&read_key)).await {
      Ok(Ok(Some(bytes))) => bytes,
      Ok(Ok(None)) => {
        debug!(url, "Asset cache miss");
        return None;
      }
      Ok(Err(e)) => {
        warn!(url, error = %e, "Failed to read asset from disk cache");
        return None;
      }
      Err(e) => {
        warn!(url, error = %e, "Disk cache read task failed");
        return None;
      }
    };

    debug!(url, "Asset disk hit, promoting to memory");
    let blob = Blob::from(bytes);
    self.memory.insert(key, blob.clone()).await;
    Some(CacheResult::new(blob, CacheSource::Disk))
  }

  /// Cached payload for `url`, if any tier has it.
  pub async fn get(&self, url: &str) -> Option<Blob> {
    self.lookup(url).await.map(|r| r.data)
  }

  /// Store `blob` for `url` in memory as-is, and as a JPEG on disk.
  pub async fn put(&self, blob: Blob, url: &str) {
    let key = asset_key(url);
    self.memory.insert(key.clone(), blob.clone()).await;
    self.persist(key, blob, url).await;
  }

  /// Cached payload for `url`, downloading it on a full miss.
  ///
  /// Returns `None` if the download fails or the payload is not an image.
  pub async fn fetch_and_cache(&self, url: &str) -> Option<Blob> {
    self.fetch_and_cache_with_source(url).await.map(|r| r.data)
  }

  /// Like [`AssetCache::fetch_and_cache`], reporting where the payload came from.
  pub async fn fetch_and_cache_with_source(&self, url: &str) -> Option<CacheResult<Blob>> {
    if let Some(hit) = self.lookup(url).await {
      return Some(hit);
    }

    let parsed = match Url::parse(url) {
      Ok(parsed) => parsed,
      Err(e) => {
        warn!(url, error = %e, "Invalid asset URL");
        return None;
      }
    };

    info!(url, "Downloading asset");
    let response = match self.transport.get(&parsed).await {
      Ok(response) => response,
      Err(e) => {
        warn!(url, error = %e, "Asset download failed");
        return None;
      }
    };

    if !response.is_success() {
      warn!(url, status = response.status, "Asset download returned error status");
      return None;
    }

    let blob = response.body;
    let key = asset_key(url);

    // Only images are cached; anything else is reported as unavailable
    if !self.persist(key.clone(), blob.clone(), url).await {
      warn!(url, "Downloaded asset is not a decodable image");
      return None;
    }

    self.memory.insert(key, blob.clone()).await;
    Some(CacheResult::new(blob, CacheSource::Network))
  }

  /// Empty both tiers.
  pub async fn clear(&self) -> io::Result<()> {
    self.memory.invalidate_all();
    self.memory.run_pending_tasks().await;

    let disk = Arc::clone(&self.disk);
    tokio::task::spawn_blocking(move || disk.clear())
      .await
      .map_err(io::Error::other)??;

    info!(dir = %self.disk.dir().display(), "Asset cache cleared");
    Ok(())
  }

  /// Bytes used by the persistent tier; 0 if it cannot be read.
  pub async fn size_on_disk(&self) -> u64 {
    let disk = Arc::clone(&self.disk);
    match tokio::task::spawn_blocking(move || disk.size_on_disk()).await {
      Ok(Ok(size)) => size,
      Ok(Err(e)) => {
        warn!(error = %e, "Failed to measure disk cache");
        0
      }
      Err(e) => {
        warn!(error = %e, "Disk cache size task failed");
        0
      }
    }
  }

  /// Entries currently held in memory.
  pub async fn memory_entry_count(&self) -> u64 {
    self.memory.run_pending_tasks().await;
    self.memory.entry_count()
  }

  /// Write to the persistent tier. Returns whether the payload was an image.
  async fn persist(&self, key: String, blob: Blob, url: &str) -> bool {
    let disk = Arc::clone(&self.disk);
    match tokio::task::spawn_blocking(move || disk.write(&key, &blob)).await {
      Ok(Ok(written)) => written,
      Ok(Err(e)) => {
        // Still an image; the memory tier keeps serving it
        warn!(url, error = %e, "Failed to write asset to disk cache");
        true
      }
      Err(e) => {
        warn!(url, error = %e, "Disk cache write task failed");
        true
      }
    }
  }
}

/// Memory tier bounded by both a byte budget and an entry count.
///
/// moka supports a single weighted capacity, so the count cap is enforced by
/// charging every entry at least `max_bytes / max_entries`.
fn memory_tier(max_entries: u64, max_bytes: u64) -> Cache<String, Blob> {
  let min_weight = (max_bytes / max_entries.max(1)).max(1);

  Cache::builder()
    .max_capacity(max_bytes)
    .weigher(move |_key: &String, value: &Blob| -> u32 {
      (value.len() as u64)
        .max(min_weight)
        .min(u32::MAX as u64) as u32
    })
    .build()
}
