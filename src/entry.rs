use crate::time;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A container for a value in the cache, holding all necessary metadata.
///
/// `created_at` is fixed when the key is first computed; `updated_at` moves
/// forward every time a computation (miss-path or refresh) successfully
/// replaces the value.
#[derive(Debug)]
pub struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  value: Arc<V>,
  /// Creation timestamp in nanoseconds since the cache epoch.
  created_at: u64,
  /// Last successful-computation timestamp in nanoseconds since the epoch.
  updated_at: AtomicU64,
}

impl<V> CacheEntry<V> {
  /// Creates a new `CacheEntry` for a freshly computed value.
  pub fn new(value: V) -> Self {
    let now = time::now_nanos();
    Self {
      value: Arc::new(value),
      created_at: now,
      updated_at: AtomicU64::new(now),
    }
  }

  /// Creates an entry that replaces `previous` after a refresh.
  ///
  /// The original creation timestamp is preserved; `updated_at` is set to
  /// the current time.
  pub fn refreshed(value: V, previous: &CacheEntry<V>) -> Self {
    Self {
      value: Arc::new(value),
      created_at: previous.created_at,
      updated_at: AtomicU64::new(time::now_nanos()),
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  /// The time at which this key was first computed, relative to the epoch.
  #[inline]
  pub fn created_at(&self) -> Duration {
    Duration::from_nanos(self.created_at)
  }

  /// The time of the last successful computation, relative to the epoch.
  #[inline]
  pub fn updated_at(&self) -> Duration {
    Duration::from_nanos(self.updated_at.load(Ordering::Relaxed))
  }

  /// Elapsed time since the last successful computation.
  ///
  /// This is the staleness measure the refresh scheduler compares against
  /// its refresh interval.
  #[inline]
  pub fn updated_age(&self) -> Duration {
    time::now_duration().saturating_sub(self.updated_at())
  }
}
