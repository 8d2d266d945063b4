//! Cached APOD client that wraps ApodClient with an in-memory record cache.

use chrono::NaiveDate;
use futures::future::{FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::connectivity::Connectivity;
use crate::error::ApodError;
use crate::http::BoxFuture;
use crate::retry::RetryPolicy;

use super::cache::RecordKey;
use super::client::ApodClient;
use super::types::Record;

/// One fetch that every concurrent caller for the same key awaits.
type SharedFetch = Shared<BoxFuture<'static, Result<Record, ApodError>>>;

type InFlightMap = Arc<Mutex<HashMap<RecordKey, InFlight>>>;

struct InFlight {
  /// Distinguishes successive fetches for the same key
  id: u64,
  fetch: SharedFetch,
}

/// APOD client with connectivity gating, retries and a record cache.
///
/// Records never expire; they live until [`CachedApodClient::clear_cache`].
/// Concurrent misses for one key share a single network fetch, which is
/// dropped once its last caller goes away. Failed fetches are not cached.
#[derive(Clone)]
pub struct CachedApodClient {
  inner: ApodClient,
  connectivity: Connectivity,
  retry: RetryPolicy,
  records: Arc<RwLock<HashMap<RecordKey, Record>>>,
  in_flight: InFlightMap,
  next_fetch_id: Arc<AtomicU64>,
}

impl CachedApodClient {
  pub fn new(inner: ApodClient, connectivity: Connectivity, retry: RetryPolicy) -> Self {
    Self {
      inner,
      connectivity,
      retry,
      records: Arc::new(RwLock::new(HashMap::new())),
      in_flight: Arc::new(Mutex::new(HashMap::new())),
      next_fetch_id: Arc::new(AtomicU64::new(0)),
    }
  }

  /// Get the record for `date` (`None` = today's record).
  ///
  /// 1. Fail fast when offline
  /// 2. Serve from cache on hit
  /// 3. Otherwise join or start the fetch for this key
  pub async fn get_record(&self, date: Option<NaiveDate>) -> Result<Record, ApodError> {
    let key = RecordKey::for_date(date);

    self.connectivity.check()?;

    if let Some(record) = self.cached(&key).await {
      debug!(%key, "Record cache hit");
      return Ok(record);
    }

    let (id, fetch) = {
      let mut in_flight = self.in_flight.lock().await;
      match in_flight.get(&key) {
        Some(entry) => {
          debug!(%key, "Joining in-flight fetch");
          (entry.id, entry.fetch.clone())
        }
        None => {
          // A fetch may have finished between the lookup above and taking the lock
          if let Some(record) = self.cached(&key).await {
            return Ok(record);
          }
          let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
          let fetch = self.start_fetch(key.clone(), id, date);
          in_flight.insert(
            key.clone(),
            InFlight {
              id,
              fetch: fetch.clone(),
            },
          );
          (id, fetch)
        }
      }
    };

    let waiter = Waiter {
      key: Some(key),
      id,
      in_flight: Arc::clone(&self.in_flight),
    };
    let result = fetch.await;
    waiter.disarm();
    result
  }

  /// Today's record, keyed by the `"today"` sentinel.
  pub async fn get_current_record(&self) -> Result<Record, ApodError> {
    self.get_record(None).await
  }

  /// Drop every cached record and forget in-flight fetches.
  ///
  /// Callers already waiting on a fetch still receive its result.
  pub async fn clear_cache(&self) {
    self.in_flight.lock().await.clear();
    self.records.write().await.clear();
    info!("Record cache cleared");
  }

  /// Number of cached records.
  pub async fn cached_len(&self) -> usize {
    self.records.read().await.len()
  }

  /// Number of fetches currently shared through the in-flight map.
  pub async fn in_flight_len(&self) -> usize {
    self.in_flight.lock().await.len()
  }

  async fn cached(&self, key: &RecordKey) -> Option<Record> {
    self.records.read().await.get(key).cloned()
  }

  /// The returned future caches a successful record before leaving the
  /// in-flight map, so a caller that misses both maps can safely start anew.
  fn start_fetch(&self, key: RecordKey, id: u64, date: Option<NaiveDate>) -> SharedFetch {
    let client = self.inner.clone();
    let retry = self.retry;
    let records = Arc::clone(&self.records);
    // Weak, since the map itself owns this future
    let in_flight = Arc::downgrade(&self.in_flight);

    let fetch: BoxFuture<'static, Result<Record, ApodError>> = Box::pin(async move {
      info!(%key, "Fetching record");
      let result = retry.run(|| client.fetch(date)).await;

      if let Ok(record) = &result {
        records.write().await.insert(key.clone(), record.clone());
      }
      if let Some(in_flight) = Weak::upgrade(&in_flight) {
        remove_if_current(&in_flight, &key, id, |_| true).await;
      }

      result
    });

    fetch.shared()
  }
}

/// Remove the entry for `key` if it is still fetch `id` and `pred` holds.
async fn remove_if_current(
  in_flight: &Mutex<HashMap<RecordKey, InFlight>>,
  key: &RecordKey,
  id: u64,
  pred: impl FnOnce(&InFlight) -> bool,
) -> Option<InFlight> {
  let mut map = in_flight.lock().await;
  match map.get(key) {
    Some(entry) if entry.id == id && pred(entry) => map.remove(key),
    _ => None,
  }
}

/// Held by a caller while it awaits a shared fetch.
///
/// If the caller is dropped before the fetch resolves and nobody else is
/// waiting, the fetch is taken out of the in-flight map, which drops it and
/// its pending request.
struct Waiter {
  key: Option<RecordKey>,
  id: u64,
  in_flight: InFlightMap,
}

impl Waiter {
  fn disarm(mut self) {
    self.key = None;
  }
}

impl Drop for Waiter {
  fn drop(&mut self) {
    let Some(key) = self.key.take() else {
      return;
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      return;
    };

    let in_flight = Arc::clone(&self.in_flight);
    let id = self.id;
    // Drop cannot await the lock; by the time this runs the caller's handle is gone
    runtime.spawn(async move {
      // Only the map's own handle left means every caller has given up
      let abandoned =
        remove_if_current(&in_flight, &key, id, |e| e.fetch.strong_count() == Some(1)).await;
      if abandoned.is_some() {
        debug!(%key, "Dropped abandoned fetch");
      }
    });
  }
}
