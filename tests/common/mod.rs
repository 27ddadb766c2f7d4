#![allow(dead_code)]

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use keyflight::{CacheBuilder, MemoryStore, SelfPopulatingCache};

/// A simple open-once gate for holding a computation in flight until the
/// test decides to release it.
pub struct Gate {
  open: Mutex<bool>,
  cond: Condvar,
}

impl Gate {
  pub fn new() -> Self {
    Self {
      open: Mutex::new(false),
      cond: Condvar::new(),
    }
  }

  /// Releases every current and future waiter.
  pub fn open(&self) {
    let mut open = self.open.lock().unwrap();
    *open = true;
    self.cond.notify_all();
  }

  /// Blocks until the gate is opened.
  pub fn wait(&self) {
    let mut open = self.open.lock().unwrap();
    while !*open {
      open = self.cond.wait(open).unwrap();
    }
  }
}

/// An in-memory cache with no expiry, for most tests.
pub fn build_test_cache(name: &str) -> SelfPopulatingCache<i32, String> {
  CacheBuilder::new(name).build().unwrap()
}

/// An in-memory cache whose entries expire `ttl` after their last update.
pub fn build_test_cache_with_ttl(name: &str, ttl: Duration) -> SelfPopulatingCache<i32, String> {
  CacheBuilder::with_store(name, std::sync::Arc::new(MemoryStore::with_time_to_live(ttl)))
    .build()
    .unwrap()
}
