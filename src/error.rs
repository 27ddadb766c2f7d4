use std::time::Duration;

use thiserror::Error;

/// An error produced by a caller-supplied computation.
///
/// This enum is intended for caching: a computation failure can be written to
/// an error store by [`ExceptionCachingCache`](crate::ExceptionCachingCache)
/// and replayed to later callers without re-running the computation, so it
/// must be cloneable and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
  /// The computation ran but found nothing for the key.
  #[error("not found")]
  NotFound,
  /// The computation failed. The attached string describes the failure.
  #[error("computation failed: {0}")]
  Failed(String),
}

/// Errors returned by `get_or_compute`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
  /// The computation for the key failed.
  ///
  /// Every caller coalesced onto the same in-flight computation receives the
  /// same `ComputeError` payload.
  #[error(transparent)]
  Compute(#[from] ComputeError),
  /// This caller was a waiter on another caller's in-flight computation and
  /// its wait deadline elapsed.
  ///
  /// The owning computation is unaffected and keeps running; other waiters
  /// are unaffected as well.
  #[error("timed out after {0:?} waiting for in-flight computation")]
  WaitTimeout(Duration),
}

/// A failure inside a refresh-ahead cycle.
///
/// Never surfaced to `get_or_compute` callers; delivered to the configured
/// [`RefreshListener`](crate::RefreshListener) and logged. The previously
/// cached value is always left in place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
  /// The refresh computation failed.
  #[error(transparent)]
  Compute(#[from] ComputeError),
  /// The refresh could not be submitted because the worker pool queue was
  /// full. The key becomes eligible again on the next cycle.
  #[error("refresh worker pool saturated")]
  PoolSaturated,
}

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// The pending-computation map was configured with zero shards.
  #[error("pending map shard count cannot be zero")]
  ZeroShards,
  /// An asynchronous refresh mode was configured with zero workers.
  #[error("refresh worker count cannot be zero")]
  ZeroWorkers,
  /// The refresh policy was configured with a zero scan period.
  #[error("refresh period cannot be zero")]
  ZeroPeriod,
  /// The refresh policy was configured with a zero staleness interval, which
  /// would refresh every entry on every cycle.
  #[error("refresh interval cannot be zero")]
  ZeroRefreshInterval,
  /// A refresh policy was configured but no computation was provided to run
  /// the refreshes with.
  #[error("a refresh policy requires a computation")]
  ComputationRequired,
}
