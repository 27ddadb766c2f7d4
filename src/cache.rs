use crate::builder::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::{CacheError, ComputeError};
use crate::flight::{Flight, FlightOutcome};
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;
use crate::store::{BackingStore, MemoryStore};

use core::fmt;
use std::hash::Hash;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A cache that computes and stores missing values itself, guaranteeing that
/// concurrent callers for the same key share a single computation.
///
/// The first caller to register intent for a key becomes the *owner* and runs
/// the computation outside any lock; every concurrent caller for that key
/// becomes a *waiter* and observes the owner's outcome, value or error,
/// without invoking its own computation. Failures are propagated and never
/// written to the backing store (see
/// [`ExceptionCachingCache`](crate::ExceptionCachingCache) for cached
/// failures).
///
/// This is a cheap handle over an `Arc`-shared core; clones observe the same
/// cache.
pub struct SelfPopulatingCache<K: Send, V: Send + Sync, S = MemoryStore<K, V>> {
  pub(crate) shared: Arc<CacheShared<K, V, S>>,
}

impl<K: Send, V: Send + Sync, S> Clone for SelfPopulatingCache<K, V, S> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K: Send, V: Send + Sync, S> fmt::Debug for SelfPopulatingCache<K, V, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SelfPopulatingCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<K: Send, V: Send + Sync, S> SelfPopulatingCache<K, V, S> {
  /// The cache's name, as given to the builder.
  pub fn name(&self) -> &str {
    &self.shared.name
  }

  /// The comparable configuration the cache was built with.
  pub fn config(&self) -> &CacheConfig {
    &self.shared.config
  }

  /// A point-in-time snapshot of the cache's metrics.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The backing store this cache reads and writes through.
  pub fn store(&self) -> &Arc<S> {
    &self.shared.store
  }
}

impl<K, V, S> SelfPopulatingCache<K, V, S>
where
  K: Eq + Hash + Clone + Send,
  V: Send + Sync,
  S: BackingStore<K, V>,
{
  /// Returns the cached value for `key`, computing it if absent.
  ///
  /// If the backing store holds a current (non-expired) entry, its value is
  /// returned without calling `compute`. Otherwise this call either becomes
  /// the owner of a new computation or coalesces onto one already in flight
  /// for the key. A computation failure is returned to the owner and every
  /// waiter, and nothing is written to the store; a later call may retry.
  ///
  /// If the builder configured a default [`wait_timeout`], waiters give up
  /// after it elapses with [`CacheError::WaitTimeout`]; the owner is
  /// unaffected.
  ///
  /// [`wait_timeout`]: crate::CacheBuilder::wait_timeout
  pub fn get_or_compute<F>(&self, key: K, compute: F) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, ComputeError>,
  {
    self.do_get_or_compute(key, compute, self.shared.config.wait_timeout)
  }

  /// Like [`get_or_compute`](Self::get_or_compute), with an explicit maximum
  /// wait for callers that coalesce onto an in-flight computation.
  ///
  /// A timed-out waiter fails with [`CacheError::WaitTimeout`] without
  /// cancelling the owner's computation or disturbing other waiters.
  pub fn get_or_compute_timeout<F>(
    &self,
    key: K,
    compute: F,
    wait: Duration,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, ComputeError>,
  {
    self.do_get_or_compute(key, compute, Some(wait))
  }

  fn do_get_or_compute<F>(
    &self,
    key: K,
    compute: F,
    wait: Option<Duration>,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, ComputeError>,
  {
    // 1. Optimistic store read; a current entry never invokes the computation.
    if let Some(entry) = self.shared.store.get(&key) {
      if !self.shared.store.is_expired(&entry) {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        return Ok(entry.value());
      }
    }

    // 2. Register or join. This lookup-or-insert under the shard lock is the
    //    single atomic step that decides ownership: two callers can never
    //    both see "no pending computation" for the same key.
    let (flight, is_owner) = {
      let mut pending = self.shared.pending_shard(&key).lock();
      match pending.get(&key) {
        Some(existing) => {
          self
            .shared
            .metrics
            .coalesced_hits
            .fetch_add(1, Ordering::Relaxed);
          (Arc::clone(existing), false)
        }
        None => {
          self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
          let flight = Arc::new(Flight::new());
          pending.insert(key.clone(), Arc::clone(&flight));
          (flight, true)
        }
      }
    }; // registration lock released before computing or waiting

    if is_owner {
      return self.compute_as_owner(&key, &flight, compute);
    }

    // 3. Waiter path: suspend until the owner publishes the outcome.
    let outcome = match wait {
      None => Some(flight.wait()),
      Some(wait) => flight.wait_until(Instant::now() + wait),
    };
    match outcome {
      Some(Ok(value)) => Ok(value),
      Some(Err(err)) => Err(CacheError::Compute(err)),
      None => {
        self
          .shared
          .metrics
          .wait_timeouts
          .fetch_add(1, Ordering::Relaxed);
        // `wait` must be Some to get here.
        Err(CacheError::WaitTimeout(wait.unwrap_or_default()))
      }
    }
  }

  /// The owner path: run the computation, publish the outcome, and release
  /// the pending record.
  fn compute_as_owner<F>(
    &self,
    key: &K,
    flight: &Arc<Flight<V>>,
    compute: F,
  ) -> Result<Arc<V>, CacheError>
  where
    F: FnOnce(&K) -> Result<V, ComputeError>,
  {
    // The guard releases the pending record and fails the waiters if the
    // computation panics, so a poisoned key can always be retried.
    let guard = FlightGuard {
      shared: &self.shared,
      key,
      flight,
      finished: false,
    };

    // Another caller may have stored a value between our optimistic read and
    // winning the registration; serve it instead of recomputing.
    if let Some(entry) = self.shared.store.get(key) {
      if !self.shared.store.is_expired(&entry) {
        let value = entry.value();
        guard.complete(Ok(Arc::clone(&value)));
        return Ok(value);
      }
    }

    self
      .shared
      .metrics
      .computations
      .fetch_add(1, Ordering::Relaxed);

    match compute(key) {
      Ok(value) => {
        let entry = Arc::new(CacheEntry::new(value));
        let value = entry.value();
        self.shared.store.put(key.clone(), entry);
        self.shared.metrics.inserts.fetch_add(1, Ordering::Relaxed);
        guard.complete(Ok(Arc::clone(&value)));
        Ok(value)
      }
      Err(err) => {
        self
          .shared
          .metrics
          .computation_failures
          .fetch_add(1, Ordering::Relaxed);
        // Failures are delivered to every waiter but never stored.
        guard.complete(Err(err.clone()));
        Err(CacheError::Compute(err))
      }
    }
  }

  /// Returns the cached value for `key` without ever computing.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    match self.shared.store.get(key) {
      Some(entry) if !self.shared.store.is_expired(&entry) => {
        self.shared.metrics.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.value())
      }
      _ => {
        self.shared.metrics.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  /// Removes the entry for `key`, returning `true` if one was present.
  ///
  /// Does not affect a computation currently in flight for the key; its
  /// result will still be stored and delivered to its waiters.
  pub fn invalidate(&self, key: &K) -> bool {
    let removed = self.shared.store.remove(key).is_some();
    if removed {
      self
        .shared
        .metrics
        .invalidations
        .fetch_add(1, Ordering::Relaxed);
    }
    removed
  }

  /// Removes all entries from the backing store.
  pub fn clear(&self) {
    self.shared.store.remove_all();
  }
}

/// Releases the owner's pending record on every exit path.
///
/// `complete` removes the record and publishes the outcome in order: removal
/// first, so no new caller can join a flight that is about to finish, then
/// completion, which wakes everyone already joined. If the owner unwinds
/// before `complete`, `Drop` performs the same release with a synthesized
/// failure so waiters are never stranded.
struct FlightGuard<'a, K: Eq + Hash + Send, V: Send + Sync, S> {
  shared: &'a CacheShared<K, V, S>,
  key: &'a K,
  flight: &'a Arc<Flight<V>>,
  finished: bool,
}

impl<K, V, S> FlightGuard<'_, K, V, S>
where
  K: Eq + Hash + Send,
  V: Send + Sync,
{
  fn complete(mut self, outcome: FlightOutcome<V>) {
    self.release(outcome);
  }

  fn release(&mut self, outcome: FlightOutcome<V>) {
    if self.finished {
      return;
    }
    self.finished = true;
    self.shared.pending_shard(self.key).lock().remove(self.key);
    self.flight.complete(outcome);
  }
}

impl<K, V, S> Drop for FlightGuard<'_, K, V, S>
where
  K: Eq + Hash + Send,
  V: Send + Sync,
{
  fn drop(&mut self) {
    if !self.finished {
      self.release(Err(ComputeError::Failed(
        "computation panicked before completing".into(),
      )));
    }
  }
}
