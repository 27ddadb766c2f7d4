use crate::cache::SelfPopulatingCache;
use crate::error::{BuildError, ComputeError};
use crate::flight::{Computation, Flight};
use crate::listener::RefreshListener;
use crate::metrics::Metrics;
use crate::shared::CacheShared;
use crate::store::{BackingStore, MemoryStore};
use crate::task::refresher::{Refresher, RefresherContext};
use crate::task::worker::WorkerPool;

use core::fmt;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// How the refresh scheduler executes an individual refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
  /// The refresh runs on the scheduler thread itself, blocking the scan
  /// until it completes.
  Sync,
  /// The refresh is submitted to a bounded pool of `workers` threads and the
  /// scan continues immediately. A full pool queue rejects the refresh for
  /// this cycle.
  Async { workers: usize },
}

/// Configuration for refresh-ahead: proactive recomputation of entries that
/// have not been updated recently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
  /// How often the scheduler scans the backing store.
  pub period: Duration,
  /// Entries whose last successful computation is older than this are
  /// refreshed; younger entries are skipped.
  pub refresh_interval: Duration,
  /// Whether refreshes run on the scheduler thread or a worker pool.
  pub mode: ExecutionMode,
}

/// The comparable subset of a cache's settings.
///
/// The registry uses this to detect a shared cache being re-requested with
/// different parameters (the first requester's settings win; later,
/// conflicting requests are logged).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  /// Shard count of the pending-computation map.
  pub pending_shards: usize,
  /// Default maximum time a waiter blocks on another caller's in-flight
  /// computation. `None` waits indefinitely.
  pub wait_timeout: Option<Duration>,
  /// The refresh-ahead policy, if any.
  pub refresh: Option<RefreshPolicy>,
}

/// A builder for creating [`SelfPopulatingCache`] instances.
pub struct CacheBuilder<K: Send, V: Send, S = MemoryStore<K, V>> {
  name: String,
  store: Arc<S>,
  pending_shards: usize,
  wait_timeout: Option<Duration>,
  refresh: Option<RefreshPolicy>,
  computation: Option<Arc<dyn Computation<K, V>>>,
  listener: Option<Arc<dyn RefreshListener<K>>>,
}

impl<K: Send, V: Send, S> fmt::Debug for CacheBuilder<K, V, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("pending_shards", &self.pending_shards)
      .field("wait_timeout", &self.wait_timeout)
      .field("refresh", &self.refresh)
      .field("has_computation", &self.computation.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, V> CacheBuilder<K, V, MemoryStore<K, V>>
where
  K: Eq + Hash + Send,
  V: Send,
{
  /// Creates a builder for a cache named `name` backed by an in-memory store
  /// with no expiry.
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_store(name, Arc::new(MemoryStore::new()))
  }
}

impl<K: Send, V: Send, S> CacheBuilder<K, V, S> {
  /// Creates a builder for a cache named `name` over a caller-supplied
  /// backing store.
  pub fn with_store(name: impl Into<String>, store: Arc<S>) -> Self {
    Self {
      name: name.into(),
      store,
      pending_shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      wait_timeout: None,
      refresh: None,
      computation: None,
      listener: None,
    }
  }

  /// The name of the cache this builder produces.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Sets the number of concurrent shards of the pending-computation map.
  pub fn pending_shards(mut self, shards: usize) -> Self {
    self.pending_shards = shards;
    self
  }

  /// Sets the default maximum time a waiter blocks on another caller's
  /// in-flight computation before failing with a timeout.
  ///
  /// The owning computation itself is never cancelled by a waiter timeout.
  pub fn wait_timeout(mut self, duration: Duration) -> Self {
    self.wait_timeout = Some(duration);
    self
  }

  /// Sets the computation the refresh scheduler re-invokes for stale entries.
  ///
  /// Required when a [`RefreshPolicy`] is configured. Must be safe to retry.
  pub fn computation(
    mut self,
    f: impl Fn(&K) -> Result<V, ComputeError> + Send + Sync + 'static,
  ) -> Self {
    self.computation = Some(Arc::new(f));
    self
  }

  /// Enables refresh-ahead with the given policy.
  pub fn refresh(mut self, policy: RefreshPolicy) -> Self {
    self.refresh = Some(policy);
    self
  }

  /// Sets the listener notified of refresh failures.
  pub fn refresh_listener<L>(mut self, listener: L) -> Self
  where
    L: RefreshListener<K> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// The comparable configuration this builder would produce.
  pub fn config(&self) -> CacheConfig {
    CacheConfig {
      pending_shards: self.pending_shards,
      wait_timeout: self.wait_timeout,
      refresh: self.refresh,
    }
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.pending_shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if let Some(policy) = &self.refresh {
      if policy.period.is_zero() {
        return Err(BuildError::ZeroPeriod);
      }
      if policy.refresh_interval.is_zero() {
        return Err(BuildError::ZeroRefreshInterval);
      }
      if let ExecutionMode::Async { workers: 0 } = policy.mode {
        return Err(BuildError::ZeroWorkers);
      }
      if self.computation.is_none() {
        return Err(BuildError::ComputationRequired);
      }
    }
    Ok(())
  }
}

impl<K, V, S> CacheBuilder<K, V, S>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: BackingStore<K, V> + 'static,
{
  /// Builds the cache, spawning the refresh scheduler if one is configured.
  pub fn build(self) -> Result<SelfPopulatingCache<K, V, S>, BuildError> {
    self.validate()?;

    let config = self.config();
    let metrics = Arc::new(Metrics::new());
    let pending_shards = self.pending_shards.next_power_of_two();

    let mut pending: Vec<CachePadded<Mutex<HashMap<K, Arc<Flight<V>>, ahash::RandomState>>>> =
      Vec::with_capacity(pending_shards);
    for _ in 0..pending_shards {
      pending.push(CachePadded::new(Mutex::new(HashMap::default())));
    }

    let refresher = match &self.refresh {
      Some(policy) => {
        // `validate` guarantees a computation is present.
        let computation = self
          .computation
          .clone()
          .ok_or(BuildError::ComputationRequired)?;
        let pool = match policy.mode {
          ExecutionMode::Sync => None,
          ExecutionMode::Async { workers } => Some(WorkerPool::spawn(workers)),
        };
        let context = Arc::new(RefresherContext {
          cache_name: self.name.clone(),
          store: Arc::clone(&self.store),
          computation,
          in_flight: Mutex::new(HashSet::default()),
          metrics: Arc::clone(&metrics),
          listener: self.listener.clone(),
          refresh_interval: policy.refresh_interval,
        });
        Some(Refresher::spawn(context, pool, policy.period))
      }
      None => None,
    };

    Ok(SelfPopulatingCache {
      shared: Arc::new(CacheShared {
        name: self.name,
        config,
        store: self.store,
        hasher: ahash::RandomState::new(),
        pending: pending.into_boxed_slice(),
        metrics,
        refresher,
      }),
    })
  }
}
