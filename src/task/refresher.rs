use crate::entry::CacheEntry;
use crate::error::{ComputeError, RefreshError};
use crate::flight::Computation;
use crate::listener::RefreshListener;
use crate::metrics::Metrics;
use crate::store::BackingStore;
use crate::task::worker::WorkerPool;

use std::collections::HashSet;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A context object holding the thread-safe parts of the cache that the
/// refresh scheduler and its workers need to access.
pub(crate) struct RefresherContext<K, V, S> {
  pub(crate) cache_name: String,
  pub(crate) store: Arc<S>,
  pub(crate) computation: Arc<dyn Computation<K, V>>,
  /// Keys with a refresh currently in progress. Entries are transient and
  /// removed on every exit path, so this set is bounded by the number of
  /// concurrently refreshing keys, never by the number of keys ever seen.
  pub(crate) in_flight: Mutex<HashSet<K, ahash::RandomState>>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) listener: Option<Arc<dyn RefreshListener<K>>>,
  pub(crate) refresh_interval: Duration,
}

/// The background task that proactively recomputes entries before they are
/// requested again ("refresh-ahead").
///
/// Runs on its own thread with a fixed scan period. Refresh failures are
/// contained here: they are logged, reported to the listener, and leave the
/// stale entry in place; they never reach `get_or_compute` callers.
pub(crate) struct Refresher {
  handle: Option<JoinHandle<()>>,
  stop_flag: Arc<AtomicBool>,
}

impl Refresher {
  /// Spawns the scheduler thread. In async mode the thread also owns the
  /// worker pool, so stopping the scheduler drains and joins the workers.
  pub(crate) fn spawn<K, V, S>(
    context: Arc<RefresherContext<K, V, S>>,
    pool: Option<WorkerPool>,
    period: Duration,
  ) -> Self
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    S: BackingStore<K, V> + 'static,
  {
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop_flag);

    let handle = thread::Builder::new()
      .name(format!("keyflight-refresher-{}", context.cache_name))
      .spawn(move || {
        while !stop_clone.load(Ordering::Relaxed) {
          let cycle_start = Instant::now();

          run_cycle(&context, pool.as_ref());

          // Sleep for the remaining duration of the period.
          if let Some(remaining) = period.checked_sub(cycle_start.elapsed()) {
            thread::sleep(remaining);
          }
        }
        // `pool` is dropped here, draining queued refreshes before exit.
      })
      .expect("failed to spawn refresh scheduler thread");

    Self {
      handle: Some(handle),
      stop_flag,
    }
  }

  /// Signals the scheduler thread to stop and waits for it to finish its
  /// current cycle and shut down its workers.
  pub(crate) fn stop(mut self) {
    self.stop_flag.store(true, Ordering::Relaxed);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

/// One scan of the backing store.
///
/// Per-key decision ladder, in order: skip if a refresh is already in flight
/// from a prior cycle, skip if the entry expired (the normal miss path will
/// recompute it), skip if the entry is younger than the refresh interval,
/// otherwise register a tracker and refresh.
fn run_cycle<K, V, S>(context: &Arc<RefresherContext<K, V, S>>, pool: Option<&WorkerPool>)
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: BackingStore<K, V> + 'static,
{
  for key in context.store.keys() {
    if context.in_flight.lock().contains(&key) {
      log::debug!(
        "cache {}: refresh still in progress from a prior cycle, skipping key",
        context.cache_name
      );
      context.metrics.refresh_skips.fetch_add(1, Ordering::Relaxed);
      continue;
    }

    // The entry may have been removed since the key snapshot was taken.
    let entry = match context.store.get(&key) {
      Some(entry) => entry,
      None => continue,
    };
    if context.store.is_expired(&entry) {
      // Expired data is not worth refreshing; the miss path handles it.
      continue;
    }
    if entry.updated_age() < context.refresh_interval {
      continue;
    }

    context.in_flight.lock().insert(key.clone());

    match pool {
      None => refresh_entry(context, key, entry),
      Some(pool) => {
        let job_context = Arc::clone(context);
        let job_key = key.clone();
        let job = Box::new(move || refresh_entry(&job_context, job_key, entry));
        if pool.try_submit(job).is_err() {
          // Release the tracker right away so the key is eligible again
          // next cycle instead of being stuck as "in progress".
          context.in_flight.lock().remove(&key);
          context
            .metrics
            .refresh_rejections
            .fetch_add(1, Ordering::Relaxed);
          log::warn!(
            "cache {}: refresh worker pool saturated, deferring key to next cycle",
            context.cache_name
          );
          if let Some(listener) = &context.listener {
            listener.on_refresh_failure(&key, &RefreshError::PoolSaturated);
          }
        }
      }
    }
  }
}

/// Recomputes one entry, on the scheduler thread (sync mode) or a worker
/// (async mode). The tracker is removed on every exit path, panics included.
fn refresh_entry<K, V, S>(
  context: &Arc<RefresherContext<K, V, S>>,
  key: K,
  previous: Arc<CacheEntry<V>>,
) where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: BackingStore<K, V> + 'static,
{
  let _tracker = TrackerGuard {
    context,
    key: key.clone(),
  };

  context.metrics.refreshes.fetch_add(1, Ordering::Relaxed);

  // A panicking computation must not unwind the scheduler thread (sync mode)
  // or kill a pool worker (async mode); it is contained here and treated as
  // a failed refresh.
  let result = panic::catch_unwind(AssertUnwindSafe(|| context.computation.compute(&key)))
    .unwrap_or_else(|_| Err(ComputeError::Failed("refresh computation panicked".into())));

  match result {
    Ok(value) => {
      let entry = Arc::new(CacheEntry::refreshed(value, &previous));
      // The key may have been invalidated while the refresh ran; a refresh
      // must never resurrect a removed entry.
      if context.store.get(&key).is_some() {
        context.store.put(key, entry);
      }
    }
    Err(err) => {
      // The stale value stays; a refresh failure must never evict a
      // previously good entry. The key re-qualifies next cycle.
      context
        .metrics
        .refresh_failures
        .fetch_add(1, Ordering::Relaxed);
      log::warn!(
        "cache {}: refresh failed, keeping stale entry: {err}",
        context.cache_name
      );
      if let Some(listener) = &context.listener {
        listener.on_refresh_failure(&key, &RefreshError::Compute(err));
      }
    }
  }
}

/// Removes the per-key refresh tracker when the refresh finishes, whether it
/// returned or unwound.
struct TrackerGuard<'a, K: Eq + Hash, V, S> {
  context: &'a RefresherContext<K, V, S>,
  key: K,
}

impl<K: Eq + Hash, V, S> Drop for TrackerGuard<'_, K, V, S> {
  fn drop(&mut self) {
    self.context.in_flight.lock().remove(&self.key);
  }
}
