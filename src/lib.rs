//! A concurrent, self-populating cache with single-flight semantics.
//!
//! # Features
//! - **Computation coalescing**: concurrent callers for the same key share a
//!   single in-flight computation; the first caller computes, everyone else
//!   waits for its outcome.
//! - **Exception caching**: computation failures can be cached in a separate
//!   error store and replayed without re-running the computation.
//! - **Refresh-ahead**: a background scheduler recomputes entries before
//!   they go stale, with at most one refresh per key in flight and either
//!   scheduler-thread or worker-pool execution.
//! - **Scoped registry**: named caches resolved as per-call-site private
//!   instances or race-safe lazy shared singletons.
//! - **Pluggable storage**: any `BackingStore` implementation; a sharded
//!   in-memory store with optional TTL is included.
//! - **Observability**: detailed metrics and a refresh-failure listener.

// Public modules that form the API
pub mod builder;
pub mod entry;
pub mod error;
pub mod exception;
pub mod listener;
pub mod metrics;
pub mod registry;
pub mod store;

// Internal, crate-only modules
mod cache;
mod flight;
mod shared;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::{CacheBuilder, CacheConfig, ExecutionMode, RefreshPolicy};
pub use cache::SelfPopulatingCache;
pub use entry::CacheEntry;
pub use error::{BuildError, CacheError, ComputeError, RefreshError};
pub use exception::ExceptionCachingCache;
pub use flight::Computation;
pub use listener::RefreshListener;
pub use metrics::MetricsSnapshot;
pub use registry::{CacheRegistry, CacheScope};
pub use store::{BackingStore, MemoryStore};
