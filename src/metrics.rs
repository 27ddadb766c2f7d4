use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Lookup outcomes ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  /// Lookups that joined another caller's in-flight computation.
  pub(crate) coalesced_hits: CachePadded<AtomicU64>,

  // --- Computation ---
  pub(crate) computations: CachePadded<AtomicU64>,
  pub(crate) computation_failures: CachePadded<AtomicU64>,
  pub(crate) wait_timeouts: CachePadded<AtomicU64>,

  // --- Store traffic ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Exception caching ---
  pub(crate) errors_cached: CachePadded<AtomicU64>,
  pub(crate) errors_replayed: CachePadded<AtomicU64>,

  // --- Refresh-ahead ---
  pub(crate) refreshes: CachePadded<AtomicU64>,
  pub(crate) refresh_failures: CachePadded<AtomicU64>,
  /// Keys skipped because a refresh from a prior cycle was still running.
  pub(crate) refresh_skips: CachePadded<AtomicU64>,
  /// Refreshes rejected by a saturated worker pool.
  pub(crate) refresh_rejections: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      coalesced_hits: CachePadded::new(AtomicU64::new(0)),
      computations: CachePadded::new(AtomicU64::new(0)),
      computation_failures: CachePadded::new(AtomicU64::new(0)),
      wait_timeouts: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      errors_cached: CachePadded::new(AtomicU64::new(0)),
      errors_replayed: CachePadded::new(AtomicU64::new(0)),
      refreshes: CachePadded::new(AtomicU64::new(0)),
      refresh_failures: CachePadded::new(AtomicU64::new(0)),
      refresh_skips: CachePadded::new(AtomicU64::new(0)),
      refresh_rejections: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let total_lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      coalesced_hits: self.coalesced_hits.load(Ordering::Relaxed),
      computations: self.computations.load(Ordering::Relaxed),
      computation_failures: self.computation_failures.load(Ordering::Relaxed),
      wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      errors_cached: self.errors_cached.load(Ordering::Relaxed),
      errors_replayed: self.errors_replayed.load(Ordering::Relaxed),
      refreshes: self.refreshes.load(Ordering::Relaxed),
      refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
      refresh_skips: self.refresh_skips.load(Ordering::Relaxed),
      refresh_rejections: self.refresh_rejections.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, publicly visible copy of the cache's metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
  pub hits: u64,
  pub misses: u64,
  pub hit_ratio: f64,
  /// Lookups that coalesced onto another caller's in-flight computation
  /// instead of triggering their own.
  pub coalesced_hits: u64,
  pub computations: u64,
  pub computation_failures: u64,
  pub wait_timeouts: u64,
  pub inserts: u64,
  pub invalidations: u64,
  pub errors_cached: u64,
  pub errors_replayed: u64,
  pub refreshes: u64,
  pub refresh_failures: u64,
  pub refresh_skips: u64,
  pub refresh_rejections: u64,
  pub uptime_secs: u64,
}
