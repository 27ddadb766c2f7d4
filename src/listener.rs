use crate::error::RefreshError;

/// A listener that can be registered with the cache to receive notifications
/// when a background refresh fails.
///
/// Refresh failures never reach `get_or_compute` callers; this hook (plus a
/// `log::warn!`) is the only place they surface. The previously cached value
/// is always retained, and the key becomes eligible again on the next cycle.
///
/// The listener is called on the thread the refresh ran on, so it should
/// return quickly.
pub trait RefreshListener<K>: Send + Sync {
  fn on_refresh_failure(&self, key: &K, error: &RefreshError);
}

impl<K, F> RefreshListener<K> for F
where
  F: Fn(&K, &RefreshError) + Send + Sync,
{
  fn on_refresh_failure(&self, key: &K, error: &RefreshError) {
    self(key, error)
  }
}
