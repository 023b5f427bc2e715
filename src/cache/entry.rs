//! Cache entries and fetch results.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;

use super::key::QueryKey;
use crate::error::ApiError;

/// Fetch status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
  /// Never fetched
  Idle,
  /// A request is in flight (data may still hold the previous result)
  Fetching,
  /// Last applied request succeeded
  Success,
  /// Last applied request failed (data keeps the last good result, if any)
  Error,
}

/// Snapshot of one cache entry.
///
/// Entries are only ever handed out by value; the cache swaps the stored
/// entry as a whole under its lock.
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub key: QueryKey,
  pub data: Option<Value>,
  pub status: FetchStatus,
  pub fetched_at: Option<Instant>,
  pub stale_after: Option<Instant>,
  pub error: Option<ApiError>,
  /// Set by `invalidate`; cleared when a request issued afterwards lands.
  pub invalidated: bool,
}

impl CacheEntry {
  pub fn new(key: QueryKey) -> Self {
    Self {
      key,
      data: None,
      status: FetchStatus::Idle,
      fetched_at: None,
      stale_after: None,
      error: None,
      invalidated: false,
    }
  }

  pub fn is_stale(&self, now: Instant) -> bool {
    self.invalidated || self.stale_after.map_or(true, |t| now >= t)
  }

  pub fn is_fetching(&self) -> bool {
    self.status == FetchStatus::Fetching
  }

  /// Data decoded as `T`, if any.
  pub fn data_as<T: DeserializeOwned>(&self) -> Option<Result<T, ApiError>> {
    self
      .data
      .as_ref()
      .map(|v| T::deserialize(v).map_err(ApiError::decode))
  }
}

/// Indicates where fetched data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Data from cache past its staleness window; a refetch is under way
  CacheStale,
}

/// Result of a cache fetch, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheResult<U> {
    CacheResult {
      data: f(self.data),
      source: self.source,
    }
  }
}
