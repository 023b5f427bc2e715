//! In-memory query cache for server collections.
//!
//! This module provides a keyed cache of fetch results that:
//! - Deduplicates concurrent fetches of the same key
//! - Serves stale data while a single background request refreshes it
//! - Applies responses in issue order, so a late reply never overwrites a newer one
//! - Supports prefix invalidation after writes
//! - Notifies subscribers of every state transition
//! - Evicts entries nobody has observed within the GC window

mod entry;
mod key;
mod layer;

pub use entry::{CacheEntry, CacheResult, CacheSource, FetchStatus};
pub use key::{EntityKind, QueryKey};
pub use layer::{CacheConfig, Listener, QueryCache, Subscription};
