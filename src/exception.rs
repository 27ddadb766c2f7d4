use crate::cache::SelfPopulatingCache;
use crate::entry::CacheEntry;
use crate::error::{CacheError, ComputeError};
use crate::metrics::MetricsSnapshot;
use crate::store::{BackingStore, MemoryStore};

use core::fmt;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// A decorator over [`SelfPopulatingCache`] that additionally caches and
/// replays computation failures.
///
/// Failures are held in a second, dedicated backing store: a current cached
/// error for a key is re-raised immediately, without invoking the computation
/// or the inner cache. A fresh failure is written to the error store paired
/// with removal of any value entry, and a success removes any error entry, so
/// a cached value and a cached failure for the same key never coexist.
///
/// Waiter timeouts are not computation outcomes and are never cached.
///
/// How long a failure is replayed is the error store's expiry policy; an
/// error store without expiry replays failures until the key succeeds or the
/// entry is removed.
pub struct ExceptionCachingCache<K: Send, V: Send + Sync, S, E = MemoryStore<K, ComputeError>> {
  inner: SelfPopulatingCache<K, V, S>,
  error_store: Arc<E>,
}

impl<K: Send, V: Send + Sync, S, E> Clone for ExceptionCachingCache<K, V, S, E> {
  fn clone(&self) -> Self {
    Self {
      inner: self.inner.clone(),
      error_store: Arc::clone(&self.error_store),
    }
  }
}

impl<K: Send, V: Send + Sync, S, E> fmt::Debug for ExceptionCachingCache<K, V, S, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ExceptionCachingCache")
      .field("inner", &self.inner)
      .finish_non_exhaustive()
  }
}

impl<K, V, S> ExceptionCachingCache<K, V, S, MemoryStore<K, ComputeError>>
where
  K: Eq + Hash + Send,
  V: Send + Sync,
{
  /// Wraps `inner` with an in-memory error store whose entries expire `ttl`
  /// after being written.
  ///
  /// An expired error entry stops being replayed; the next call runs the
  /// computation again.
  pub fn with_error_ttl(inner: SelfPopulatingCache<K, V, S>, ttl: Duration) -> Self {
    Self::new(inner, Arc::new(MemoryStore::with_time_to_live(ttl)))
  }
}

impl<K: Send, V: Send + Sync, S, E> ExceptionCachingCache<K, V, S, E> {
  /// Wraps `inner` with a caller-supplied error store.
  pub fn new(inner: SelfPopulatingCache<K, V, S>, error_store: Arc<E>) -> Self {
    Self { inner, error_store }
  }

  /// The wrapped cache.
  pub fn inner(&self) -> &SelfPopulatingCache<K, V, S> {
    &self.inner
  }

  /// A point-in-time snapshot of the inner cache's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.inner.metrics()
  }
}

impl<K, V, S, E> ExceptionCachingCache<K, V, S, E>
where
  K: Eq + Hash + Clone + Send,
  V: Send + Sync,
  S: BackingStore<K, V>,
  E: BackingStore<K, ComputeError>,
{
  /// Returns the cached value for `key`, computing it if absent, replaying a
  /// cached failure if one is current.
  pub fn get_or_compute<F>(&self, key: K, compute: F) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, ComputeError>,
  {
    // A current cached failure short-circuits everything: no computation,
    // no inner lookup.
    if let Some(entry) = self.error_store.get(&key) {
      if !self.error_store.is_expired(&entry) {
        self
          .inner
          .shared
          .metrics
          .errors_replayed
          .fetch_add(1, Ordering::Relaxed);
        return Err(CacheError::Compute((*entry.value()).clone()));
      }
    }

    match self.inner.get_or_compute(key.clone(), compute) {
      Ok(value) => {
        // A success and a cached failure for the same key must never
        // coexist; clearing here is idempotent.
        self.error_store.remove(&key);
        Ok(value)
      }
      Err(CacheError::Compute(err)) => {
        // Pair the error write with removal of any leftover value entry.
        self.inner.shared.store.remove(&key);
        let replaced = self
          .error_store
          .put(key, Arc::new(CacheEntry::new(err.clone())));
        // Coalesced waiters all land here with the same failure; count the
        // cached error once, not once per waiter.
        let duplicate = replaced
          .is_some_and(|prev| !self.error_store.is_expired(&prev) && *prev.value() == err);
        if !duplicate {
          self
            .inner
            .shared
            .metrics
            .errors_cached
            .fetch_add(1, Ordering::Relaxed);
        }
        Err(CacheError::Compute(err))
      }
      // A waiter timeout says nothing about the computation; never cache it.
      Err(other) => Err(other),
    }
  }

  /// Removes both the value and any cached failure for `key`.
  pub fn invalidate(&self, key: &K) -> bool {
    let had_error = self.error_store.remove(key).is_some();
    self.inner.invalidate(key) || had_error
  }
}
