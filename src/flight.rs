use crate::error::ComputeError;

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// The outcome of one in-flight computation, shared by the owner and every
/// waiter coalesced onto it.
pub(crate) type FlightOutcome<V> = Result<Arc<V>, ComputeError>;

/// The internal state of a value being computed.
pub(crate) enum FlightState<V> {
  Computing,
  Done(FlightOutcome<V>),
}

/// The per-key pending-computation record.
///
/// Exactly one `Flight` exists per key while a computation is in flight. The
/// first caller to register it becomes the owner and eventually calls
/// [`complete`](Flight::complete); every other caller blocks in
/// [`wait`](Flight::wait) or [`wait_until`](Flight::wait_until) and observes
/// the same outcome. A `Flight` is transient: it is removed from the pending
/// map before it is completed, so no caller can join a finished flight's key
/// without starting a fresh registration.
pub(crate) struct Flight<V> {
  state: Mutex<FlightState<V>>,
  done: Condvar,
}

impl<V> Flight<V> {
  /// Creates a new `Flight` in the "Computing" state.
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(FlightState::Computing),
      done: Condvar::new(),
    }
  }

  /// Completes the flight with an outcome, waking all waiters.
  ///
  /// Completing twice is a logic error; the first outcome wins.
  pub(crate) fn complete(&self, outcome: FlightOutcome<V>) {
    let mut state = self.state.lock();
    if matches!(*state, FlightState::Computing) {
      *state = FlightState::Done(outcome);
      self.done.notify_all();
    }
  }

  /// Blocks the current thread until the owner completes the flight.
  pub(crate) fn wait(&self) -> FlightOutcome<V> {
    let mut state = self.state.lock();
    loop {
      if let FlightState::Done(outcome) = &*state {
        return outcome.clone();
      }
      self.done.wait(&mut state);
    }
  }

  /// Blocks until the flight completes or `deadline` passes.
  ///
  /// Returns `None` on timeout. The owner is unaffected; it keeps computing
  /// for the waiters that did not time out.
  pub(crate) fn wait_until(&self, deadline: Instant) -> Option<FlightOutcome<V>> {
    let mut state = self.state.lock();
    loop {
      if let FlightState::Done(outcome) = &*state {
        return Some(outcome.clone());
      }
      if self.done.wait_until(&mut state, deadline).timed_out() {
        // A completion may have raced the timeout; check once more.
        if let FlightState::Done(outcome) = &*state {
          return Some(outcome.clone());
        }
        return None;
      }
    }
  }
}

/// A long-lived "compute value for key" operation.
///
/// Implemented for any `Fn(&K) -> Result<V, ComputeError>` closure. A stored
/// computation is what the refresh scheduler re-invokes for stale entries;
/// per-call closures passed to `get_or_compute` do not need this trait.
///
/// Computations must be safe to retry: a failed or timed-out computation may
/// be re-run for the same key on a later miss or refresh cycle.
pub trait Computation<K, V>: Send + Sync {
  fn compute(&self, key: &K) -> Result<V, ComputeError>;
}

impl<K, V, F> Computation<K, V> for F
where
  F: Fn(&K) -> Result<V, ComputeError> + Send + Sync,
{
  fn compute(&self, key: &K) -> Result<V, ComputeError> {
    self(key)
  }
}
