use std::time::Duration;

use keyflight::{
  BuildError, CacheBuilder, ExecutionMode, RefreshPolicy, SelfPopulatingCache,
};

fn refresh_policy(mode: ExecutionMode) -> RefreshPolicy {
  RefreshPolicy {
    period: Duration::from_secs(1),
    refresh_interval: Duration::from_secs(10),
    mode,
  }
}

#[test]
fn test_defaults() {
  let cache: SelfPopulatingCache<i32, String> = CacheBuilder::new("defaults").build().unwrap();

  assert_eq!(cache.name(), "defaults");
  let config = cache.config();
  assert!(config.pending_shards.is_power_of_two());
  assert_eq!(config.wait_timeout, None);
  assert_eq!(config.refresh, None);
}

#[test]
fn test_pending_shards_rounds_up_to_power_of_two() {
  let cache: SelfPopulatingCache<i32, String> = CacheBuilder::new("shards")
    .pending_shards(6)
    .build()
    .unwrap();
  assert_eq!(cache.config().pending_shards, 6);

  // The configured value is reported as given; only the internal map layout
  // rounds up, which a smoke lookup exercises.
  cache.get_or_compute(1, |_| Ok("v".to_string())).unwrap();
  assert_eq!(*cache.get(&1).unwrap(), "v");
}

#[test]
fn test_zero_shards_is_rejected() {
  let result = CacheBuilder::<i32, String>::new("bad").pending_shards(0).build();
  assert_eq!(result.unwrap_err(), BuildError::ZeroShards);
}

#[test]
fn test_refresh_requires_a_computation() {
  let result = CacheBuilder::<i32, String>::new("bad")
    .refresh(refresh_policy(ExecutionMode::Sync))
    .build();
  assert_eq!(result.unwrap_err(), BuildError::ComputationRequired);
}

#[test]
fn test_zero_refresh_workers_is_rejected() {
  let result = CacheBuilder::<i32, String>::new("bad")
    .computation(|_| Ok("v".to_string()))
    .refresh(refresh_policy(ExecutionMode::Async { workers: 0 }))
    .build();
  assert_eq!(result.unwrap_err(), BuildError::ZeroWorkers);
}

#[test]
fn test_zero_refresh_period_is_rejected() {
  let result = CacheBuilder::<i32, String>::new("bad")
    .computation(|_| Ok("v".to_string()))
    .refresh(RefreshPolicy {
      period: Duration::ZERO,
      refresh_interval: Duration::from_secs(10),
      mode: ExecutionMode::Sync,
    })
    .build();
  assert_eq!(result.unwrap_err(), BuildError::ZeroPeriod);
}

#[test]
fn test_zero_refresh_interval_is_rejected() {
  let result = CacheBuilder::<i32, String>::new("bad")
    .computation(|_| Ok("v".to_string()))
    .refresh(RefreshPolicy {
      period: Duration::from_secs(1),
      refresh_interval: Duration::ZERO,
      mode: ExecutionMode::Sync,
    })
    .build();
  assert_eq!(result.unwrap_err(), BuildError::ZeroRefreshInterval);
}
