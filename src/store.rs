use crate::entry::CacheEntry;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

/// A helper function to hash a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// The storage collaborator of a [`SelfPopulatingCache`](crate::SelfPopulatingCache).
///
/// The cache core never inspects key structure and never owns entry storage;
/// it only reads and writes through this interface. Implementations must be
/// safe for concurrent access from multiple threads.
///
/// Expiry is a property of the store: `is_expired` is consulted by the cache
/// hit path (an expired entry is treated as a miss) and by the refresh
/// scheduler (expired entries are never refreshed).
pub trait BackingStore<K, V>: Send + Sync {
  /// Looks up the entry for `key`, expired or not.
  fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>>;

  /// Inserts or replaces the entry for `key`, returning the replaced entry
  /// if one was present.
  fn put(&self, key: K, entry: Arc<CacheEntry<V>>) -> Option<Arc<CacheEntry<V>>>;

  /// Removes the entry for `key`, returning it if present.
  fn remove(&self, key: &K) -> Option<Arc<CacheEntry<V>>>;

  /// Removes every entry.
  fn remove_all(&self);

  /// A point-in-time snapshot of the stored keys.
  ///
  /// Used by the refresh scheduler to enumerate candidates; entries may be
  /// added or removed concurrently with the scan.
  fn keys(&self) -> Vec<K>;

  /// Whether `entry` has expired under this store's policy.
  fn is_expired(&self, entry: &CacheEntry<V>) -> bool;
}

/// An in-memory `BackingStore` partitioned into independently locked shards.
///
/// This design allows for high concurrency by ensuring that operations on
/// different keys are unlikely to contend for the same lock. Entries expire
/// a fixed duration after their last successful computation, if a
/// time-to-live is configured.
pub struct MemoryStore<K, V, H = ahash::RandomState> {
  shards: Box<[CachePadded<RwLock<HashMap<K, Arc<CacheEntry<V>>, H>>>]>,
  hasher: H,
  time_to_live: Option<Duration>,
}

impl<K, V, H> fmt::Debug for MemoryStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MemoryStore")
      .field("num_shards", &self.shards.len())
      .field("time_to_live", &self.time_to_live)
      .finish()
  }
}

impl<K, V> MemoryStore<K, V, ahash::RandomState>
where
  K: Eq + Hash,
{
  /// Creates a store with a default shard count and no expiry.
  pub fn new() -> Self {
    Self::with_shards((num_cpus::get() * 4).max(1), None)
  }

  /// Creates a store whose entries expire `ttl` after their last update.
  pub fn with_time_to_live(ttl: Duration) -> Self {
    Self::with_shards((num_cpus::get() * 4).max(1), Some(ttl))
  }

  /// Creates a store with an explicit shard count and optional expiry.
  ///
  /// The shard count is rounded up to a power of two for fast index masking.
  pub fn with_shards(num_shards: usize, time_to_live: Option<Duration>) -> Self {
    Self::with_hasher(num_shards, time_to_live, ahash::RandomState::new())
  }
}

impl<K, V> Default for MemoryStore<K, V, ahash::RandomState>
where
  K: Eq + Hash,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V, H> MemoryStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with a caller-supplied hasher.
  pub fn with_hasher(num_shards: usize, time_to_live: Option<Duration>, hasher: H) -> Self {
    let num_shards = num_shards.max(1).next_power_of_two();
    let mut shards = Vec::with_capacity(num_shards);
    for _ in 0..num_shards {
      let shard_map = HashMap::with_hasher(hasher.clone());
      shards.push(CachePadded::new(RwLock::new(shard_map)));
    }

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
      time_to_live,
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &RwLock<HashMap<K, Arc<CacheEntry<V>>, H>> {
    let hash = hash_key(&self.hasher, key);
    // Safe: shard count is a power of two and at least one.
    &self.shards[hash as usize & (self.shards.len() - 1)]
  }

  /// The number of stored entries, expired or not.
  pub fn len(&self) -> usize {
    self.shards.iter().map(|s| s.read().len()).sum()
  }

  /// Whether the store holds no entries.
  pub fn is_empty(&self) -> bool {
    self.shards.iter().all(|s| s.read().is_empty())
  }
}

impl<K, V, H> BackingStore<K, V> for MemoryStore<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn get(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).read().get(key).cloned()
  }

  fn put(&self, key: K, entry: Arc<CacheEntry<V>>) -> Option<Arc<CacheEntry<V>>> {
    self.shard(&key).write().insert(key, entry)
  }

  fn remove(&self, key: &K) -> Option<Arc<CacheEntry<V>>> {
    self.shard(key).write().remove(key)
  }

  fn remove_all(&self) {
    for shard in self.shards.iter() {
      shard.write().clear();
    }
  }

  fn keys(&self) -> Vec<K> {
    let mut keys = Vec::new();
    for shard in self.shards.iter() {
      keys.extend(shard.read().keys().cloned());
    }
    keys
  }

  fn is_expired(&self, entry: &CacheEntry<V>) -> bool {
    match self.time_to_live {
      Some(ttl) => entry.updated_age() >= ttl,
      None => false,
    }
  }
}
