//! Persistent tier: a flat directory of JPEG files with size-capped eviction.
//!
//! Everything here is blocking I/O. Callers run it on the blocking pool; the
//! internal mutex serializes writers and the eviction sweep.

use image::codecs::jpeg::JpegEncoder;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// File extension for cached assets.
const EXTENSION: &str = "jpg";

/// A file in the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskEntry {
  pub path: PathBuf,
  pub size_bytes: u64,
  pub modified: SystemTime,
}

/// Outcome of an eviction sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
  pub removed: usize,
  pub bytes_before: u64,
  pub bytes_after: u64,
}

/// Choose which entries to delete once the directory holds more than `max_bytes`.
///
/// Oldest-modified first, until at least `total - max_bytes / 2` bytes are
/// freed. Freeing down to half the ceiling keeps the next few writes from
/// triggering another sweep.
pub fn plan_evictions(mut entries: Vec<DiskEntry>, max_bytes: u64) -> Vec<DiskEntry> {
  let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
  if total <= max_bytes {
    return Vec::new();
  }

  let target = total - max_bytes / 2;
  entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

  let mut freed = 0u64;
  let mut planned = Vec::new();
  for entry in entries {
    if freed >= target {
      break;
    }
    freed += entry.size_bytes;
    planned.push(entry);
  }
  planned
}

/// Re-encode an image payload as JPEG at `quality` (1-100).
///
/// Returns `None` when the payload is not a decodable image.
pub fn encode_jpeg(payload: &[u8], quality: u8) -> Option<Vec<u8>> {
  let image = image::load_from_memory(payload).ok()?;
  let rgb = image.to_rgb8();

  let mut out = Vec::new();
  let mut encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
  encoder.encode_image(&rgb).ok()?;
  Some(out)
}

/// Persistent asset store.
#[derive(Debug)]
pub struct DiskStorage {
  dir: PathBuf,
  max_bytes: u64,
  jpeg_quality: u8,
  lock: Mutex<()>,
}

impl DiskStorage {
  /// Open (creating if needed) the cache directory.
  pub fn open(dir: impl Into<PathBuf>, max_bytes: u64, jpeg_quality: u8) -> io::Result<Self> {
    let dir = dir.into();
    fs::create_dir_all(&dir)?;

    Ok(Self {
      dir,
      max_bytes,
      jpeg_quality,
      lock: Mutex::new(()),
    })
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  pub fn max_bytes(&self) -> u64 {
    self.max_bytes
  }

  fn guard(&self) -> MutexGuard<'_, ()> {
    // The guard protects no data, so a poisoned lock is still usable
    self.lock.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{}.{}", key, EXTENSION))
  }

  /// Read an entry and mark it as recently used.
  pub fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
    let _guard = self.guard();
    let path = self.path_for(key);

    let bytes = match fs::read(&path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e),
    };

    if let Err(e) = touch(&path) {
      debug!(path = %path.display(), error = %e, "Failed to refresh access time");
    }

    Ok(Some(bytes))
  }

  /// Re-encode `payload` and store it. Returns `false` if it is not an image.
  pub fn write(&self, key: &str, payload: &[u8]) -> io::Result<bool> {
    let Some(encoded) = encode_jpeg(payload, self.jpeg_quality) else {
      debug!(key, "Payload is not a decodable image, not persisting");
      return Ok(false);
    };

    self.store(key, &encoded)?;
    Ok(true)
  }

  /// Store already-encoded bytes, then evict if over the ceiling.
  pub fn store(&self, key: &str, encoded: &[u8]) -> io::Result<()> {
    let _guard = self.guard();
    let path = self.path_for(key);

    // Write to a hidden temp file first so readers never see a partial entry
    let tmp = self.dir.join(format!(".{}.tmp", key));
    if let Err(e) = write_file(&tmp, encoded).and_then(|()| fs::rename(&tmp, &path)) {
      // Hidden files are never counted or evicted, so a leftover would leak
      if let Err(cleanup) = fs::remove_file(&tmp) {
        if cleanup.kind() != ErrorKind::NotFound {
          warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp file");
        }
      }
      return Err(e);
    }

    let report = self.evict_locked()?;
    if report.removed > 0 {
      info!(
        removed = report.removed,
        bytes_before = report.bytes_before,
        bytes_after = report.bytes_after,
        "Evicted assets from disk cache"
      );
    }
    Ok(())
  }

  /// Total bytes held by cache entries.
  pub fn size_on_disk(&self) -> io::Result<u64> {
    let _guard = self.guard();
    Ok(self.entries()?.iter().map(|e| e.size_bytes).sum())
  }

  /// Delete the directory and recreate it empty.
  pub fn clear(&self) -> io::Result<()> {
    let _guard = self.guard();
    match fs::remove_dir_all(&self.dir) {
      Ok(()) => {}
      Err(e) if e.kind() == ErrorKind::NotFound => {}
      Err(e) => return Err(e),
    }
    fs::create_dir_all(&self.dir)
  }

  /// Run an eviction sweep now.
  pub fn evict_if_needed(&self) -> io::Result<EvictionReport> {
    let _guard = self.guard();
    self.evict_locked()
  }

  fn evict_locked(&self) -> io::Result<EvictionReport> {
    let entries = self.entries()?;
    let bytes_before: u64 = entries.iter().map(|e| e.size_bytes).sum();

    let mut report = EvictionReport {
      removed: 0,
      bytes_before,
      bytes_after: bytes_before,
    };

    for entry in plan_evictions(entries, self.max_bytes) {
      match fs::remove_file(&entry.path) {
        Ok(()) => {
          report.removed += 1;
          report.bytes_after -= entry.size_bytes;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
          warn!(path = %entry.path.display(), error = %e, "Failed to evict cache entry");
        }
      }
    }

    Ok(report)
  }

  /// Cache entries, skipping hidden files (in-progress writes).
  fn entries(&self) -> io::Result<Vec<DiskEntry>> {
    let mut entries = Vec::new();

    for dir_entry in fs::read_dir(&self.dir)? {
      let dir_entry = dir_entry?;
      if dir_entry.file_name().to_string_lossy().starts_with('.') {
        continue;
      }

      let metadata = match dir_entry.metadata() {
        Ok(m) => m,
        // Removed by a concurrent clear between read_dir and stat
        Err(e) if e.kind() == ErrorKind::NotFound => continue,
        Err(e) => return Err(e),
      };
      if !metadata.is_file() {
        continue;
      }

      entries.push(DiskEntry {
        path: dir_entry.path(),
        size_bytes: metadata.len(),
        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
      });
    }

    Ok(entries)
  }
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
  let mut file = File::create(path)?;
  file.write_all(bytes)?;
  file.sync_all()
}

fn touch(path: &Path) -> io::Result<()> {
  File::options()
    .write(true)
    .open(path)?
    .set_modified(SystemTime::now())
}
