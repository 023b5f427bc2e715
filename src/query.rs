//! Poll-driven view handle over one query cache key.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! binds a loader to a [`QueryKey`] and mirrors the cache entry's state for
//! event-loop style consumers.
//!
//! # Example
//!
//! ```ignore
//! let mut query = todos.todos_query(&filter);
//!
//! // Start fetching (served from cache when fresh)
//! query.fetch();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! match query.state() {
//!     QueryState::Loading => render_spinner(),
//!     QueryState::Success(list) => render_list(list),
//!     QueryState::Error(e) => render_error(e.headline(), query.data()),
//!     QueryState::Idle => {}
//! }
//! ```

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::cache::{CacheEntry, FetchStatus, QueryCache, QueryKey, Subscription};
use crate::error::ApiError;

/// The state of a query
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Query has not been started
  Idle,
  /// Query is fetching and has no data yet
  Loading,
  /// Data is available (a refresh may be under way)
  Success(T),
  /// The last fetch failed
  Error(ApiError),
}

impl<T> QueryState<T> {
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

  pub fn error(&self) -> Option<&ApiError> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// A factory function that creates futures for fetching data
type LoaderFn<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

/// Async query bound to one cache key.
///
/// Query<T> encapsulates:
/// - The fetching logic (via a closure), run through the shared cache
/// - Loading/success/error states mirrored from the cache entry
/// - A subscription so changes made elsewhere (invalidation, another view's
///   fetch) show up on the next `poll`
pub struct Query<T> {
  cache: QueryCache,
  key: QueryKey,
  loader: LoaderFn<T>,
  state: QueryState<T>,
  /// Last good data, kept while the state is `Error`
  previous: Option<T>,
  updates: mpsc::UnboundedReceiver<CacheEntry>,
  receiver: Option<mpsc::UnboundedReceiver<Result<T, ApiError>>>,
  _subscription: Subscription,
}

impl<T> Query<T>
where
  T: Serialize + DeserializeOwned + Clone + Send + 'static,
{
  /// Create a query for `key`.
  ///
  /// The loader is called each time the cache decides to hit the network.
  pub fn new<F, Fut>(cache: QueryCache, key: QueryKey, loader: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let (subscription, updates) = cache.watch(&key);
    let mut query = Self {
      cache,
      key,
      loader: Arc::new(move || loader().boxed()),
      state: QueryState::Idle,
      previous: None,
      updates,
      receiver: None,
      _subscription: subscription,
    };
    // Pick up whatever another consumer already cached
    let entry = query.cache.read(&query.key);
    query.apply(&entry, None);
    query
  }

  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Current data, or the last good data if the latest fetch failed.
  pub fn data(&self) -> Option<&T> {
    self.state.data().or(self.previous.as_ref())
  }

  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  pub fn is_success(&self) -> bool {
    self.state.is_success()
  }

  pub fn is_error(&self) -> bool {
    self.state.is_error()
  }

  pub fn error(&self) -> Option<&ApiError> {
    self.state.error()
  }

  /// Whether a request for this key is in flight.
  pub fn is_fetching(&self) -> bool {
    self.receiver.is_some() || self.cache.read(&self.key).is_fetching()
  }

  /// Check if the cached data is past its staleness window or invalidated.
  pub fn is_stale(&self) -> bool {
    match &self.state {
      QueryState::Success(_) => self.cache.read(&self.key).is_stale(Instant::now()),
      _ => false,
    }
  }

  /// Start fetching data if this handle is not already waiting on a fetch.
  pub fn fetch(&mut self) {
    if self.receiver.is_some() {
      return;
    }
    self.start_fetch(false);
  }

  /// Force a new request, even if data is fresh or a fetch is pending.
  pub fn refetch(&mut self) {
    self.start_fetch(true);
  }

  /// Poll for changes to the cache entry or the pending fetch.
  ///
  /// Returns `true` if the state changed. Call this in your event loop tick
  /// handler.
  pub fn poll(&mut self) -> bool {
    let mut latest = None;
    while let Ok(entry) = self.updates.try_recv() {
      latest = Some(entry);
    }

    let mut outcome = None;
    if let Some(receiver) = &mut self.receiver {
      match receiver.try_recv() {
        Ok(result) => {
          outcome = Some(result);
          self.receiver = None;
        }
        Err(mpsc::error::TryRecvError::Empty) => {}
        Err(mpsc::error::TryRecvError::Disconnected) => {
          outcome = Some(Err(ApiError::Network("query was cancelled".to_string())));
          self.receiver = None;
        }
      }
    }

    if latest.is_none() && outcome.is_none() {
      return false;
    }

    // The cache is the source of truth; the fetch outcome only matters when
    // the entry is gone (cleared or evicted)
    let entry = self.cache.read(&self.key);
    self.apply(&entry, outcome);
    true
  }

  fn apply(&mut self, entry: &CacheEntry, outcome: Option<Result<T, ApiError>>) {
    let decoded = entry.data_as::<T>();

    let next = match entry.status {
      FetchStatus::Idle => match outcome {
        Some(Ok(data)) => QueryState::Success(data),
        Some(Err(e)) => QueryState::Error(e),
        None if self.receiver.is_some() => QueryState::Loading,
        None => QueryState::Idle,
      },
      FetchStatus::Fetching => match decoded {
        Some(Ok(data)) => QueryState::Success(data),
        Some(Err(e)) => QueryState::Error(e),
        None => QueryState::Loading,
      },
      FetchStatus::Success => match decoded {
        Some(Ok(data)) => QueryState::Success(data),
        Some(Err(e)) => QueryState::Error(e),
        None => QueryState::Idle,
      },
      FetchStatus::Error => {
        if let Some(Ok(data)) = decoded {
          self.previous = Some(data);
        }
        QueryState::Error(
          entry
            .error
            .clone()
            .unwrap_or_else(|| ApiError::Network("fetch failed".to_string())),
        )
      }
    };

    if let QueryState::Success(data) = &next {
      self.previous = Some(data.clone());
    }
    self.state = next;
  }

  fn start_fetch(&mut self, force: bool) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    if self.state.data().is_none() {
      self.state = QueryState::Loading;
    }

    let cache = self.cache.clone();
    let key = self.key.clone();
    let loader = self.loader.clone();
    tokio::spawn(async move {
      let result = if force {
        cache.refetch(&key, move || loader()).await
      } else {
        cache.fetch(&key, move || loader()).await
      };
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
