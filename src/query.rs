//! Keyed async query whose newest request always wins.
//!
//! A `Query<K, T, E>` runs one fetch at a time for the most recently
//! requested key. Requesting a new key aborts the previous task and drops
//! its result channel, so a slow response for an old key can never overwrite
//! the state of a newer one.
//!
//! # Example
//!
//! ```ignore
//! let client = cached_client.clone();
//! let mut query = Query::new(move |date| {
//!     let client = client.clone();
//!     async move { client.get_record(date).await }
//! });
//!
//! query.request(Some(yesterday));
//! query.request(Some(today)); // yesterday's result is discarded
//!
//! if query.wait().await {
//!     if let Some(record) = query.data() { /* ... */ }
//! }
//! ```

use std::fmt;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::http::BoxFuture;

/// The state of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryState<T, E> {
  /// Nothing requested yet
  Idle,
  /// Fetching for the current key
  Loading,
  Success(T),
  Error(E),
}

impl<T, E> QueryState<T, E> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&E> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

type FetcherFn<K, T, E> = Box<dyn Fn(K) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

struct Pending<T, E> {
  receiver: oneshot::Receiver<Result<T, E>>,
  task: JoinHandle<()>,
}

/// Superseding query over a key-taking fetcher.
pub struct Query<K, T, E> {
  state: QueryState<T, E>,
  key: Option<K>,
  fetcher: FetcherFn<K, T, E>,
  pending: Option<Pending<T, E>>,
}

impl<K, T, E> Query<K, T, E>
where
  K: Clone + PartialEq + Send + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  /// Create a query; `fetcher` is called once per request with its key.
  pub fn new<F, Fut>(fetcher: F) -> Self
  where
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    Self {
      state: QueryState::Idle,
      key: None,
      fetcher: Box::new(move |key| Box::pin(fetcher(key))),
      pending: None,
    }
  }

  pub fn state(&self) -> &QueryState<T, E> {
    &self.state
  }

  /// Key of the most recent request.
  pub fn key(&self) -> Option<&K> {
    self.key.as_ref()
  }

  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  pub fn error(&self) -> Option<&E> {
    self.state.error()
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Request `key`, superseding any pending request.
  ///
  /// Re-requesting the key that is already loading is a no-op.
  pub fn request(&mut self, key: K) {
    if self.state.is_loading() && self.key.as_ref() == Some(&key) {
      return;
    }
    self.cancel();
    self.start(key);
  }

  /// Request `key` again even if it is loading or already loaded.
  pub fn refetch(&mut self) {
    if let Some(key) = self.key.clone() {
      self.cancel();
      self.start(key);
    }
  }

  /// Abort the pending request, if any. The state is left unchanged
  /// except that `Loading` reverts to `Idle`.
  pub fn cancel(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.task.abort();
    }
    if self.state.is_loading() {
      self.state = QueryState::Idle;
    }
  }

  /// Check for a result without blocking.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };

    match pending.receiver.try_recv() {
      Ok(result) => {
        self.finish(Some(result));
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.finish(None);
        true
      }
    }
  }

  /// Wait for the pending request to settle.
  ///
  /// Returns `false` if nothing was pending.
  pub async fn wait(&mut self) -> bool {
    let Some(pending) = self.pending.as_mut() else {
      return false;
    };

    let result = (&mut pending.receiver).await.ok();
    self.finish(result);
    true
  }

  fn finish(&mut self, result: Option<Result<T, E>>) {
    self.pending = None;
    self.state = match result {
      Some(Ok(data)) => QueryState::Success(data),
      Some(Err(e)) => QueryState::Error(e),
      // Task panicked; nothing to report for this key
      None => QueryState::Idle,
    };
  }

  fn start(&mut self, key: K) {
    let (tx, rx) = oneshot::channel();
    let future = (self.fetcher)(key.clone());
    let task = tokio::spawn(async move {
      // Receiver may have been dropped by a newer request
      let _ = tx.send(future.await);
    });

    self.key = Some(key);
    self.state = QueryState::Loading;
    self.pending = Some(Pending { receiver: rx, task });
  }
}

impl<K, T, E> Drop for Query<K, T, E> {
  fn drop(&mut self) {
    if let Some(pending) = self.pending.take() {
      pending.task.abort();
    }
  }
}

impl<K: fmt::Debug, T: fmt::Debug, E: fmt::Debug> fmt::Debug for Query<K, T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
