mod common;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use keyflight::{CacheBuilder, CacheError, ComputeError};

use common::{build_test_cache, build_test_cache_with_ttl, Gate};

#[test]
fn test_miss_computes_then_hit_serves_stored_value() {
  let cache = build_test_cache("basic");
  let invocations = Arc::new(AtomicUsize::new(0));

  let counter = Arc::clone(&invocations);
  let value = cache
    .get_or_compute(1, move |key| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(format!("value-{key}"))
    })
    .unwrap();
  assert_eq!(*value, "value-1");

  // The second call must be served from the store without computing.
  let counter = Arc::clone(&invocations);
  let value = cache
    .get_or_compute(1, move |key| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(format!("recomputed-{key}"))
    })
    .unwrap();
  assert_eq!(*value, "value-1");
  assert_eq!(invocations.load(Ordering::SeqCst), 1);

  let m = cache.metrics();
  assert_eq!(m.misses, 1);
  assert_eq!(m.hits, 1);
  assert_eq!(m.computations, 1);
  assert_eq!(m.inserts, 1);
}

#[test]
fn test_thundering_herd_coalesces_to_one_computation() {
  const NUM_THREADS: usize = 10;

  let cache = build_test_cache("herd");
  let invocations = Arc::new(AtomicUsize::new(0));
  let barrier = Arc::new(Barrier::new(NUM_THREADS));

  let mut handles = Vec::with_capacity(NUM_THREADS);
  for _ in 0..NUM_THREADS {
    let cache = cache.clone();
    let invocations = Arc::clone(&invocations);
    let barrier = Arc::clone(&barrier);
    handles.push(thread::spawn(move || {
      barrier.wait();
      cache.get_or_compute(42, move |_| {
        invocations.fetch_add(1, Ordering::SeqCst);
        // Hold the flight open long enough for every other thread to join.
        thread::sleep(Duration::from_millis(100));
        Ok("shared".to_string())
      })
    }));
  }

  for handle in handles {
    let value = handle.join().unwrap().unwrap();
    assert_eq!(*value, "shared");
  }

  assert_eq!(invocations.load(Ordering::SeqCst), 1);

  let m = cache.metrics();
  assert_eq!(m.computations, 1);
  assert_eq!(m.misses, 1);
  // Every non-owner either joined the flight or, if it arrived after the
  // owner published, read the stored value.
  assert_eq!(m.coalesced_hits + m.hits, (NUM_THREADS - 1) as u64);
}

#[test]
fn test_failure_propagates_and_is_not_stored() {
  let cache = build_test_cache("failure");

  let result = cache.get_or_compute(7, |_| -> Result<String, ComputeError> {
    Err(ComputeError::Failed("boom".into()))
  });
  assert_eq!(
    result.unwrap_err(),
    CacheError::Compute(ComputeError::Failed("boom".into()))
  );
  assert!(cache.get(&7).is_none());

  // The pending record is released on failure, so the key can be retried.
  let value = cache.get_or_compute(7, |_| Ok("second try".to_string())).unwrap();
  assert_eq!(*value, "second try");

  let m = cache.metrics();
  assert_eq!(m.computation_failures, 1);
  assert_eq!(m.computations, 2);
  assert_eq!(m.inserts, 1);
}

#[test]
fn test_failure_is_delivered_to_every_waiter() {
  const NUM_WAITERS: usize = 4;

  let cache = build_test_cache("failure-herd");
  let invocations = Arc::new(AtomicUsize::new(0));
  let gate = Arc::new(Gate::new());

  // The owner registers the flight, then blocks on the gate.
  let owner = {
    let cache = cache.clone();
    let invocations = Arc::clone(&invocations);
    let gate = Arc::clone(&gate);
    thread::spawn(move || {
      cache.get_or_compute(9, move |_| -> Result<String, ComputeError> {
        invocations.fetch_add(1, Ordering::SeqCst);
        gate.wait();
        Err(ComputeError::NotFound)
      })
    })
  };

  // Give the owner time to take ownership before the waiters arrive.
  thread::sleep(Duration::from_millis(50));

  let mut waiters = Vec::with_capacity(NUM_WAITERS);
  for _ in 0..NUM_WAITERS {
    let cache = cache.clone();
    let invocations = Arc::clone(&invocations);
    waiters.push(thread::spawn(move || {
      cache.get_or_compute(9, move |_| {
        invocations.fetch_add(1, Ordering::SeqCst);
        Ok("never".to_string())
      })
    }));
  }

  thread::sleep(Duration::from_millis(50));
  gate.open();

  assert_eq!(
    owner.join().unwrap().unwrap_err(),
    CacheError::Compute(ComputeError::NotFound)
  );
  for waiter in waiters {
    assert_eq!(
      waiter.join().unwrap().unwrap_err(),
      CacheError::Compute(ComputeError::NotFound)
    );
  }

  assert_eq!(invocations.load(Ordering::SeqCst), 1);
  assert!(cache.get(&9).is_none());
}

#[test]
fn test_waiter_timeout_leaves_owner_running() {
  let cache = build_test_cache("timeout");
  let gate = Arc::new(Gate::new());

  let owner = {
    let cache = cache.clone();
    let gate = Arc::clone(&gate);
    thread::spawn(move || {
      cache.get_or_compute(3, move |_| {
        gate.wait();
        Ok("slow".to_string())
      })
    })
  };

  thread::sleep(Duration::from_millis(50));

  let result = cache.get_or_compute_timeout(
    3,
    |_| Ok("impatient".to_string()),
    Duration::from_millis(20),
  );
  assert_eq!(
    result.unwrap_err(),
    CacheError::WaitTimeout(Duration::from_millis(20))
  );

  // The owner is unaffected by the waiter giving up.
  gate.open();
  let value = owner.join().unwrap().unwrap();
  assert_eq!(*value, "slow");
  assert_eq!(*cache.get(&3).unwrap(), "slow");

  let m = cache.metrics();
  assert_eq!(m.wait_timeouts, 1);
  assert_eq!(m.computations, 1);
}

#[test]
fn test_default_wait_timeout_from_builder() {
  let cache: keyflight::SelfPopulatingCache<i32, String> = CacheBuilder::new("default-timeout")
    .wait_timeout(Duration::from_millis(20))
    .build()
    .unwrap();
  let gate = Arc::new(Gate::new());

  let owner = {
    let cache = cache.clone();
    let gate = Arc::clone(&gate);
    thread::spawn(move || {
      cache.get_or_compute(1, move |_| {
        gate.wait();
        Ok("slow".to_string())
      })
    })
  };

  thread::sleep(Duration::from_millis(50));

  // No explicit wait: the builder default applies to the coalescing caller.
  let result = cache.get_or_compute(1, |_| Ok("unused".to_string()));
  assert_eq!(
    result.unwrap_err(),
    CacheError::WaitTimeout(Duration::from_millis(20))
  );

  gate.open();
  assert_eq!(*owner.join().unwrap().unwrap(), "slow");
}

#[test]
fn test_expired_entry_is_recomputed() {
  let cache = build_test_cache_with_ttl("expiry", Duration::from_millis(50));
  let invocations = Arc::new(AtomicUsize::new(0));

  let counter = Arc::clone(&invocations);
  let value = cache
    .get_or_compute(5, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok("first".to_string())
    })
    .unwrap();
  assert_eq!(*value, "first");

  thread::sleep(Duration::from_millis(100));
  assert!(cache.get(&5).is_none());

  let counter = Arc::clone(&invocations);
  let value = cache
    .get_or_compute(5, move |_| {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok("second".to_string())
    })
    .unwrap();
  assert_eq!(*value, "second");
  assert_eq!(invocations.load(Ordering::SeqCst), 2);
}

#[test]
fn test_panicking_computation_releases_the_key() {
  let cache = build_test_cache("panic");

  let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
    let _ = cache.get_or_compute(11, |_| -> Result<String, ComputeError> {
      panic!("computation blew up");
    });
  }));
  assert!(result.is_err());

  // The pending record must have been released; the key is usable again.
  let value = cache
    .get_or_compute(11, |_| Ok("recovered".to_string()))
    .unwrap();
  assert_eq!(*value, "recovered");
}

#[test]
fn test_panicking_owner_fails_its_waiters() {
  let cache = build_test_cache("panic-waiters");
  let gate = Arc::new(Gate::new());

  let owner = {
    let cache = cache.clone();
    let gate = Arc::clone(&gate);
    thread::spawn(move || {
      let _ = cache.get_or_compute(12, move |_| -> Result<String, ComputeError> {
        gate.wait();
        panic!("owner died");
      });
    })
  };

  thread::sleep(Duration::from_millis(50));

  let waiter = {
    let cache = cache.clone();
    thread::spawn(move || cache.get_or_compute(12, |_| Ok("never".to_string())))
  };

  thread::sleep(Duration::from_millis(50));
  gate.open();

  assert!(owner.join().is_err());
  match waiter.join().unwrap() {
    Err(CacheError::Compute(ComputeError::Failed(msg))) => {
      assert!(msg.contains("panicked"), "unexpected message: {msg}");
    }
    other => panic!("expected a synthesized failure, got {other:?}"),
  }
}

#[test]
fn test_invalidate_and_clear() {
  let cache = build_test_cache("invalidate");

  cache.get_or_compute(1, |_| Ok("one".to_string())).unwrap();
  cache.get_or_compute(2, |_| Ok("two".to_string())).unwrap();

  assert!(cache.invalidate(&1));
  assert!(!cache.invalidate(&1));
  assert!(cache.get(&1).is_none());
  assert_eq!(*cache.get(&2).unwrap(), "two");

  cache.clear();
  assert!(cache.get(&2).is_none());

  assert_eq!(cache.metrics().invalidations, 1);
}
