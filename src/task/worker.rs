use std::thread::{self, JoinHandle};

use fibre::mpmc;
use fibre::TrySendError;

/// A unit of work submitted to the pool.
pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// A bounded pool of worker threads fed from an MPMC channel.
///
/// The queue capacity equals the worker count, so at most one job can be
/// queued per busy worker. Submission never blocks: a full queue rejects the
/// job and hands it back, which the refresh scheduler reports as pool
/// saturation. Dropping the pool disconnects the channel; workers drain what
/// was already queued and exit, and are joined.
pub(crate) struct WorkerPool {
  sender: Option<mpmc::Sender<Job>>,
  handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
  /// Spawns `workers` threads. `workers` must be non-zero; the builder
  /// validates this.
  pub(crate) fn spawn(workers: usize) -> Self {
    let workers = workers.max(1);
    let (sender, receiver) = mpmc::bounded::<Job>(workers);

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
      let receiver = receiver.clone();
      let handle = thread::Builder::new()
        .name(format!("keyflight-refresh-{i}"))
        .spawn(move || {
          // Ends when the channel disconnects (sender dropped on shutdown).
          while let Ok(job) = receiver.recv() {
            job();
          }
        })
        .expect("failed to spawn refresh worker thread");
      handles.push(handle);
    }

    Self {
      sender: Some(sender),
      handles,
    }
  }

  /// Attempts to submit a job without blocking.
  ///
  /// Returns the job back if the queue is full (or the pool is shutting
  /// down) so the caller can release any per-key tracking state.
  pub(crate) fn try_submit(&self, job: Job) -> Result<(), Job> {
    let sender = match &self.sender {
      Some(sender) => sender,
      None => return Err(job),
    };
    sender.try_send(job).map_err(|err| match err {
      TrySendError::Full(job) | TrySendError::Closed(job) | TrySendError::Sent(job) => job,
    })
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    // Disconnect the queue, then wait for the workers to finish in-flight
    // and already-queued jobs.
    drop(self.sender.take());
    for handle in self.handles.drain(..) {
      let _ = handle.join();
    }
  }
}
