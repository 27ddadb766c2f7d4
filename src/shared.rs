use crate::builder::CacheConfig;
use crate::flight::Flight;
use crate::metrics::Metrics;
use crate::store::hash_key;
use crate::task::refresher::Refresher;

use core::fmt;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// The internal, thread-safe core of the cache.
///
/// Holds the backing store, the sharded pending-computation map that
/// implements the atomic register-or-join step, and the refresh scheduler
/// (if configured). Lives for as long as any handle to the cache does; the
/// refresher is stopped when the last handle is dropped.
pub(crate) struct CacheShared<K: Send, V: Send + Sync, S> {
  pub(crate) name: String,
  pub(crate) config: CacheConfig,
  pub(crate) store: Arc<S>,
  pub(crate) hasher: ahash::RandomState,
  /// One `Flight` per key with an in-flight computation. Entries are
  /// transient: inserted by the first caller for a key, removed by the owner
  /// on every exit path. Sharded to keep registration contention low.
  pub(crate) pending: Box<[CachePadded<Mutex<HashMap<K, Arc<Flight<V>>, ahash::RandomState>>>]>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) refresher: Option<Refresher>,
}

impl<K: Send, V: Send + Sync, S> fmt::Debug for CacheShared<K, V, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("name", &self.name)
      .field("config", &self.config)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K: Send, V: Send + Sync, S> Drop for CacheShared<K, V, S> {
  fn drop(&mut self) {
    if let Some(refresher) = self.refresher.take() {
      refresher.stop();
    }
  }
}

impl<K, V, S> CacheShared<K, V, S>
where
  K: Eq + Hash + Send,
  V: Send + Sync,
{
  /// Returns the pending-map shard responsible for `key`.
  #[inline]
  pub(crate) fn pending_shard(
    &self,
    key: &K,
  ) -> &Mutex<HashMap<K, Arc<Flight<V>>, ahash::RandomState>> {
    let hash = hash_key(&self.hasher, key);
    &self.pending[hash as usize & (self.pending.len() - 1)]
  }
}
