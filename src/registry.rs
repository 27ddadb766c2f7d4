use crate::builder::CacheBuilder;
use crate::cache::SelfPopulatingCache;
use crate::error::BuildError;
use crate::store::{BackingStore, MemoryStore};

use core::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Whether a resolved cache is private to the call site or shared by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
  /// Every resolution constructs a fresh, unshared instance.
  Private,
  /// All resolutions of the same name observe a single instance, created
  /// lazily by whichever caller gets there first.
  Shared,
}

/// Manages creation and reuse of [`SelfPopulatingCache`] instances by name.
///
/// Shared-scope creation is race safe without holding any lock across
/// construction: the instance is built first, then inserted if still absent;
/// a caller that loses the insert race discards its instance and uses the
/// winner's. Configuration is first-writer-wins: a later shared request
/// with different settings gets the registered instance and a warning.
pub struct CacheRegistry<K: Send, V: Send + Sync, S = MemoryStore<K, V>> {
  caches: DashMap<String, Arc<SelfPopulatingCache<K, V, S>>, ahash::RandomState>,
}

impl<K: Send, V: Send + Sync, S> fmt::Debug for CacheRegistry<K, V, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheRegistry")
      .field("registered", &self.caches.len())
      .finish()
  }
}

impl<K: Send, V: Send + Sync, S> Default for CacheRegistry<K, V, S> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Send, V: Send + Sync, S> CacheRegistry<K, V, S> {
  pub fn new() -> Self {
    Self {
      caches: DashMap::with_hasher(ahash::RandomState::new()),
    }
  }

  /// The number of shared caches currently registered.
  pub fn len(&self) -> usize {
    self.caches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.caches.is_empty()
  }
}

impl<K, V, S> CacheRegistry<K, V, S>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  S: BackingStore<K, V> + 'static,
{
  /// Resolves the cache for `builder`'s name under `scope`.
  ///
  /// `Private` always builds a new instance. `Shared` returns the instance
  /// registered under the name, building and registering it if absent.
  pub fn resolve(
    &self,
    scope: CacheScope,
    builder: CacheBuilder<K, V, S>,
  ) -> Result<Arc<SelfPopulatingCache<K, V, S>>, BuildError> {
    match scope {
      CacheScope::Private => Ok(Arc::new(builder.build()?)),
      CacheScope::Shared => self.resolve_shared(builder),
    }
  }

  fn resolve_shared(
    &self,
    builder: CacheBuilder<K, V, S>,
  ) -> Result<Arc<SelfPopulatingCache<K, V, S>>, BuildError> {
    let requested = builder.config();

    // Fast path: already registered; nothing is built at all.
    if let Some(existing) = self.caches.get(builder.name()) {
      let existing = Arc::clone(existing.value());
      if *existing.config() != requested {
        log::warn!(
          "shared cache {:?} already registered with different settings \
           ({requested:?}); keeping the first configuration ({:?})",
          existing.name(),
          existing.config()
        );
      }
      return Ok(existing);
    }

    // Build outside the map lock, then insert if still absent.
    let fresh = Arc::new(builder.build()?);
    let name = fresh.name().to_owned();

    match self.caches.entry(name) {
      Entry::Occupied(occupied) => {
        // Lost the insert race; use the winner's instance.
        let existing = Arc::clone(occupied.get());
        drop(fresh);
        if *existing.config() != requested {
          log::warn!(
            "shared cache {:?} concurrently registered with different settings; \
             keeping the first configuration",
            occupied.key()
          );
        }
        Ok(existing)
      }
      Entry::Vacant(vacant) => {
        let registered = vacant.insert(fresh);
        Ok(Arc::clone(&registered))
      }
    }
  }

  /// Removes the shared registration for `name`, if any.
  ///
  /// Existing handles keep working; the next shared resolution for the name
  /// builds a fresh instance.
  pub fn deregister(&self, name: &str) -> bool {
    self.caches.remove(name).is_some()
  }
}
