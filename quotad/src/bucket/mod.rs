//! Bucket backends
//!
//! The engine is polymorphic over bucket implementations: a
//! [`BucketBackend`] materialises [`Bucket`]s from config, and everything
//! above it (container, engine) only speaks these two traits. The reference
//! in-memory backend lives in [`memory`]; a remote token store would slot in
//! behind the same seam.

use std::sync::Arc;
use std::time::Duration;

use crate::config::BucketConfig;

pub mod memory;

pub use memory::MemoryBackend;

/// One token bucket at runtime.
pub trait Bucket: Send + Sync {
    /// The config this bucket was created from.
    fn config(&self) -> Arc<BucketConfig>;

    /// Whether this bucket was materialised from a dynamic template.
    fn dynamic(&self) -> bool;

    /// Report whether the bucket has been touched since the last call, and
    /// clear the flag. The reaper calls this once per sweep.
    fn activity_detected(&self) -> bool;

    /// Reserve `tokens` tokens. `Some(wait)` grants them once `wait` has
    /// elapsed; `None` rejects without reserving anything (the wait would
    /// exceed `max_wait`, the bucket's own wait ceiling, or the debt
    /// ceiling). Never sleeps: the caller sleeps off the returned wait.
    fn take(&self, tokens: i64, max_wait: Duration) -> Option<Duration>;
}

/// Factory for buckets of one backend flavour.
pub trait BucketBackend: Send + Sync {
    fn create(
        &self,
        namespace: &str,
        name: &str,
        cfg: Arc<BucketConfig>,
        dynamic: bool,
    ) -> Arc<dyn Bucket>;
}
