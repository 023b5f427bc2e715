//! Query cache that orchestrates caching logic with network fetching.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{CacheEntry, CacheResult, CacheSource, FetchStatus};
use super::key::{EntityKind, QueryKey};
use crate::error::ApiError;

/// Callback invoked on every state transition of a subscribed entry.
pub type Listener = Arc<dyn Fn(&CacheEntry) + Send + Sync>;

/// Type-erased loader future; values are cached as JSON.
type LoaderFuture = BoxFuture<'static, Result<Value, ApiError>>;

/// The result of one in-flight request, shareable between callers.
type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// Listeners to call and the entry to hand them, collected under the lock.
type Notice = Option<(Vec<Listener>, CacheEntry)>;

/// Timing configuration for a [`QueryCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
  /// Default staleness window
  pub stale_time: Duration,
  /// How long an unobserved entry is kept
  pub gc_time: Duration,
  kind_stale_times: HashMap<EntityKind, Duration>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self::new(Duration::from_secs(5 * 60), Duration::from_secs(10 * 60))
      .with_kind_stale_time(EntityKind::Users, Duration::from_secs(10 * 60))
  }
}

impl CacheConfig {
  pub fn new(stale_time: Duration, gc_time: Duration) -> Self {
    Self {
      stale_time,
      gc_time,
      kind_stale_times: HashMap::new(),
    }
  }

  /// Override the staleness window for one entity kind.
  pub fn with_kind_stale_time(mut self, kind: EntityKind, stale_time: Duration) -> Self {
    self.kind_stale_times.insert(kind, stale_time);
    self
  }

  pub fn stale_time_for(&self, kind: EntityKind) -> Duration {
    self
      .kind_stale_times
      .get(&kind)
      .copied()
      .unwrap_or(self.stale_time)
  }
}

struct InFlight {
  seq: u64,
  /// Cleared by `invalidate`: later fetches must not attach to a request
  /// issued before the invalidation.
  joinable: bool,
  result: SharedFetch,
}

struct Slot {
  entry: CacheEntry,
  /// Most recently issued request, until it settles.
  in_flight: Option<InFlight>,
  /// Sequence number of the last issued request. Numbers are cache-wide.
  issued_seq: u64,
  /// Sequence number of the request whose outcome the entry holds.
  applied_seq: u64,
  /// Requests up to this sequence number were issued before the last
  /// invalidation.
  invalidated_through: u64,
  listeners: HashMap<u64, Listener>,
  last_observed: Instant,
}

impl Slot {
  /// `floor` is the last sequence number issued anywhere in the cache.
  /// Requests up to it predate this slot and never apply to it.
  fn new(key: QueryKey, now: Instant, floor: u64) -> Self {
    Self {
      entry: CacheEntry::new(key),
      in_flight: None,
      issued_seq: floor,
      applied_seq: floor,
      invalidated_through: floor,
      listeners: HashMap::new(),
      last_observed: now,
    }
  }

  fn joinable(&self) -> Option<&InFlight> {
    // Resolved but never settled means the loader task died
    self
      .in_flight
      .as_ref()
      .filter(|f| f.joinable && f.result.peek().is_none())
  }

  /// Whether a request is still running. A resolved but unsettled result
  /// means its loader task died.
  fn is_fetching(&self) -> bool {
    self
      .in_flight
      .as_ref()
      .is_some_and(|f| f.result.peek().is_none())
  }

  fn notice(&self) -> Notice {
    if self.listeners.is_empty() {
      None
    } else {
      Some((self.listeners.values().cloned().collect(), self.entry.clone()))
    }
  }
}

fn notify(notice: Notice) {
  if let Some((listeners, entry)) = notice {
    for listener in listeners {
      listener(&entry);
    }
  }
}

enum Plan {
  /// Serve stored data without a request.
  Serve(Value, CacheSource),
  /// Attach to the request already in flight.
  Join(SharedFetch),
  /// Issue a request and wait for it.
  Fetch,
  /// Issue a request in the background and serve stored data now.
  Revalidate(Value),
}

struct Inner {
  slots: Mutex<HashMap<QueryKey, Slot>>,
  config: CacheConfig,
  /// Last request sequence number issued; only advanced under `slots`.
  last_seq: AtomicU64,
  next_listener: AtomicU64,
  gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, HashMap<QueryKey, Slot>> {
    self.slots.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn slot<'a>(
    &self,
    slots: &'a mut HashMap<QueryKey, Slot>,
    key: &QueryKey,
    now: Instant,
  ) -> &'a mut Slot {
    let floor = self.last_seq.load(Ordering::SeqCst);
    slots
      .entry(key.clone())
      .or_insert_with(|| Slot::new(key.clone(), now, floor))
  }

  fn next_seq(&self) -> u64 {
    self.last_seq.fetch_add(1, Ordering::SeqCst) + 1
  }

  fn remove_listener(&self, key: &QueryKey, id: u64) {
    let mut slots = self.lock();
    if let Some(slot) = slots.get_mut(key) {
      slot.listeners.remove(&id);
      slot.last_observed = Instant::now();
    }
  }
}

impl Drop for Inner {
  fn drop(&mut self) {
    if let Some(task) = self
      .gc_task
      .get_mut()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      task.abort();
    }
  }
}

/// Keyed store of fetched collections.
///
/// - Fresh data is served without calling the loader
/// - Concurrent fetches of one key share a single request
/// - Stale data is served while one background request refreshes it
/// - Results are applied in issue order per key; late responses to older
///   requests are discarded
/// - Entries nobody observes are evicted after the GC window
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct QueryCache {
  inner: Arc<Inner>,
}

impl QueryCache {
  pub fn new(config: CacheConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        slots: Mutex::new(HashMap::new()),
        config,
        last_seq: AtomicU64::new(0),
        next_listener: AtomicU64::new(1),
        gc_task: Mutex::new(None),
      }),
    }
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  /// Snapshot of the entry for `key`. Unknown keys read as `Idle`.
  pub fn read(&self, key: &QueryKey) -> CacheEntry {
    let mut slots = self.inner.lock();
    match slots.get_mut(key) {
      Some(slot) => {
        slot.last_observed = Instant::now();
        slot.entry.clone()
      }
      None => CacheEntry::new(key.clone()),
    }
  }

  /// Number of entries currently held.
  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Fetch `key`, calling `loader` only if the cache cannot answer.
  pub async fn fetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> Result<T, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.fetch_result(key, loader).await.map(|r| r.data)
  }

  /// Like [`fetch`](Self::fetch), also reporting where the data came from.
  pub async fn fetch_result<T, F, Fut>(
    &self,
    key: &QueryKey,
    loader: F,
  ) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let result = self.fetch_value(key, false, erase(loader)).await?;
    decode(result)
  }

  /// Issue a new request even if the data is fresh or a request is in flight.
  pub async fn refetch<T, F, Fut>(&self, key: &QueryKey, loader: F) -> Result<T, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let result = self.fetch_value(key, true, erase(loader)).await?;
    decode(result).map(|r| r.data)
  }

  async fn fetch_value<L>(
    &self,
    key: &QueryKey,
    force: bool,
    loader: L,
  ) -> Result<CacheResult<Value>, ApiError>
  where
    L: FnOnce() -> LoaderFuture,
  {
    let now = Instant::now();

    let (plan, started) = {
      let mut slots = self.inner.lock();
      let slot = self.inner.slot(&mut slots, key, now);
      slot.last_observed = now;

      let plan = if force {
        Plan::Fetch
      } else {
        Self::plan(slot, now)
      };

      let started = match plan {
        Plan::Fetch | Plan::Revalidate(_) => Some(Self::begin(slot, self.inner.next_seq())),
        Plan::Serve(..) | Plan::Join(_) => None,
      };
      (plan, started)
    };

    let mut issued = None;
    if let Some((seq, tx, shared, notice)) = started {
      notify(notice);
      issued = Some(shared);
      debug!(%key, seq, "Fetching");

      let future = loader();
      let cache = self.clone();
      let key = key.clone();
      tokio::spawn(async move {
        let result = AssertUnwindSafe(future)
          .catch_unwind()
          .await
          .unwrap_or_else(|_| Err(ApiError::Network("loader panicked".into())));
        let effective = cache.settle(&key, seq, result);
        // The caller may have stopped waiting
        let _ = tx.send(effective);
      });
    }

    match plan {
      Plan::Serve(data, source) => Ok(CacheResult { data, source }),
      Plan::Revalidate(data) => Ok(CacheResult {
        data,
        source: CacheSource::CacheStale,
      }),
      Plan::Join(shared) => shared.await.map(network),
      Plan::Fetch => match issued {
        Some(shared) => shared.await.map(network),
        None => Err(ApiError::Network("fetch was cancelled".into())),
      },
    }
  }

  /// Decide how to answer a non-forced fetch.
  fn plan(slot: &Slot, now: Instant) -> Plan {
    let entry = &slot.entry;
    let servable = !entry.invalidated && entry.status != FetchStatus::Error;

    if servable {
      if let Some(data) = &entry.data {
        if !entry.is_stale(now) {
          return Plan::Serve(data.clone(), CacheSource::CacheFresh);
        }
        if slot.joinable().is_some() {
          // Refresh already under way
          return Plan::Serve(data.clone(), CacheSource::CacheStale);
        }
        return Plan::Revalidate(data.clone());
      }
    }

    match slot.joinable() {
      Some(in_flight) => Plan::Join(in_flight.result.clone()),
      None => Plan::Fetch,
    }
  }

  /// Register request `seq` on `slot` and move it to `Fetching`.
  fn begin(
    slot: &mut Slot,
    seq: u64,
  ) -> (u64, oneshot::Sender<Result<Value, ApiError>>, SharedFetch, Notice) {
    slot.issued_seq = seq;

    let (tx, rx) = oneshot::channel();
    let result = async move {
      rx.await
        .unwrap_or_else(|_| Err(ApiError::Network("fetch was cancelled".into())))
    }
    .boxed()
    .shared();

    slot.in_flight = Some(InFlight {
      seq,
      joinable: true,
      result: result.clone(),
    });
    slot.entry.status = FetchStatus::Fetching;

    (seq, tx, result, slot.notice())
  }

  /// Apply the outcome of request `seq` and return what its callers get.
  ///
  /// Outcomes of requests older than the applied one are discarded; their
  /// callers receive the newer stored data instead.
  fn settle(
    &self,
    key: &QueryKey,
    seq: u64,
    result: Result<Value, ApiError>,
  ) -> Result<Value, ApiError> {
    let now = Instant::now();
    let stale_time = self.inner.config.stale_time_for(key.entity_kind());

    let (effective, notice) = {
      let mut slots = self.inner.lock();
      let slot = match slots.get_mut(key) {
        Some(slot) => slot,
        // Cleared while in flight: nothing to apply to
        None => return result,
      };

      if slot.in_flight.as_ref().is_some_and(|f| f.seq == seq) {
        slot.in_flight = None;
      }

      if seq <= slot.applied_seq {
        debug!(%key, seq, applied = slot.applied_seq, "Discarding out-of-order response");
        let effective = match &slot.entry.data {
          Some(data) => Ok(data.clone()),
          None => result,
        };
        (effective, None)
      } else {
        slot.applied_seq = seq;
        let newer_in_flight = slot.in_flight.is_some();
        let entry = &mut slot.entry;

        match &result {
          Ok(data) => {
            entry.data = Some(data.clone());
            entry.error = None;
            entry.fetched_at = Some(now);
            entry.stale_after = Some(now + stale_time);
            entry.invalidated = seq <= slot.invalidated_through;
            entry.status = if newer_in_flight {
              FetchStatus::Fetching
            } else {
              FetchStatus::Success
            };
            debug!(%key, seq, "Fetch succeeded");
          }
          Err(error) => {
            entry.error = Some(error.clone());
            entry.status = if newer_in_flight {
              FetchStatus::Fetching
            } else {
              FetchStatus::Error
            };
            debug!(%key, seq, %error, "Fetch failed");
          }
        }
        (result, slot.notice())
      }
    };

    notify(notice);
    effective
  }

  /// Mark every entry under `prefix` stale. Returns how many matched.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    self.invalidate_where(|key| key.starts_with(prefix))
  }

  /// Mark exactly `key` stale.
  pub fn invalidate_key(&self, key: &QueryKey) -> bool {
    self.invalidate_where(|k| k == key) > 0
  }

  fn invalidate_where(&self, matches: impl Fn(&QueryKey) -> bool) -> usize {
    let mut notices = Vec::new();
    {
      let mut slots = self.inner.lock();
      for (key, slot) in slots.iter_mut() {
        if !matches(key) {
          continue;
        }
        slot.entry.invalidated = true;
        slot.invalidated_through = slot.issued_seq;
        if let Some(in_flight) = slot.in_flight.as_mut() {
          in_flight.joinable = false;
        }
        debug!(%key, "Invalidated");
        notices.push(slot.notice());
      }
    }

    let count = notices.len();
    notices.into_iter().for_each(notify);
    count
  }

  /// Register `listener` for state transitions of `key`.
  ///
  /// The listener runs outside the cache lock. Dropping the returned handle
  /// unsubscribes; requests already in flight keep running.
  pub fn subscribe<F>(&self, key: &QueryKey, listener: F) -> Subscription
  where
    F: Fn(&CacheEntry) + Send + Sync + 'static,
  {
    let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
    let now = Instant::now();
    {
      let mut slots = self.inner.lock();
      let slot = self.inner.slot(&mut slots, key, now);
      slot.listeners.insert(id, Arc::new(listener));
      slot.last_observed = now;
    }

    Subscription {
      cache: Arc::downgrade(&self.inner),
      key: key.clone(),
      id,
    }
  }

  /// Subscribe through a channel instead of a callback.
  pub fn watch(&self, key: &QueryKey) -> (Subscription, mpsc::UnboundedReceiver<CacheEntry>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = self.subscribe(key, move |entry| {
      // Receiver gone means the watcher is shutting down
      let _ = tx.send(entry.clone());
    });
    (subscription, rx)
  }

  /// Evict entries with no subscribers and no request in flight that have
  /// not been observed within the GC window. Returns how many were removed.
  pub fn collect_garbage(&self) -> usize {
    let now = Instant::now();
    let gc_time = self.inner.config.gc_time;

    let mut slots = self.inner.lock();
    let before = slots.len();
    slots.retain(|key, slot| {
      let keep = !slot.listeners.is_empty()
        || slot.is_fetching()
        || now.duration_since(slot.last_observed) < gc_time;
      if !keep {
        debug!(%key, "Evicting unobserved entry");
      }
      keep
    });
    before - slots.len()
  }

  /// Start the periodic eviction sweep. Replaces a running sweep.
  pub fn start_gc(&self) {
    let cache: Weak<Inner> = Arc::downgrade(&self.inner);
    let period = (self.inner.config.gc_time / 2).max(Duration::from_millis(10));

    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(period);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let Some(inner) = cache.upgrade() else {
          break;
        };
        QueryCache { inner }.collect_garbage();
      }
    });

    let mut gc_task = self
      .inner
      .gc_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some(previous) = gc_task.replace(task) {
      previous.abort();
    }
  }

  /// Drop every entry. Requests in flight complete without populating the
  /// cache, including entries recreated for the same keys afterwards.
  pub fn clear(&self) {
    let mut slots = self.inner.lock();
    debug!(entries = slots.len(), "Clearing cache");
    slots.clear();
  }

  /// Stop the GC sweep and drop every entry.
  pub fn teardown(&self) {
    if let Some(task) = self
      .inner
      .gc_task
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take()
    {
      task.abort();
    }
    self.clear();
  }
}

impl Default for QueryCache {
  fn default() -> Self {
    Self::new(CacheConfig::default())
  }
}

impl std::fmt::Debug for QueryCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryCache")
      .field("entries", &self.len())
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}

/// Handle for a listener registered with [`QueryCache::subscribe`].
pub struct Subscription {
  cache: Weak<Inner>,
  key: QueryKey,
  id: u64,
}

impl Subscription {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  /// Stop receiving updates. Same as dropping the handle.
  pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Some(inner) = self.cache.upgrade() {
      inner.remove_listener(&self.key, self.id);
    }
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("key", &self.key)
      .field("id", &self.id)
      .finish()
  }
}

fn erase<T, F, Fut>(loader: F) -> impl FnOnce() -> LoaderFuture
where
  T: Serialize + Send + 'static,
  F: FnOnce() -> Fut,
  Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
{
  move || {
    let future = loader();
    async move {
      let data = future.await?;
      serde_json::to_value(data).map_err(ApiError::decode)
    }
    .boxed()
  }
}

fn decode<T: DeserializeOwned>(result: CacheResult<Value>) -> Result<CacheResult<T>, ApiError> {
  let source = result.source;
  let data = serde_json::from_value(result.data).map_err(ApiError::decode)?;
  Ok(CacheResult { data, source })
}

fn network(data: Value) -> CacheResult<Value> {
  CacheResult {
    data,
    source: CacheSource::Network,
  }
}
