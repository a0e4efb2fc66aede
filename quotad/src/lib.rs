//! # quotad
//!
//! The bucket engine behind a distributed quota service: callers ask
//! whether they may consume *N* tokens from a named bucket, and the engine
//! answers with an immediate grant, a grant-after-wait, or a rejection.
//!
//! Centralising the decision lets a fleet of independent callers share one
//! budget with well-defined fairness and overflow semantics. The pieces:
//!
//! - [`config`]: the hierarchical service / namespace / bucket
//!   configuration, with defaulting, validation, and pluggable persistence
//!   ([`config::ConfigSource`]).
//! - [`bucket`]: the backend seam ([`bucket::BucketBackend`]) and the
//!   reference in-memory token bucket — an accumulating deadline advanced
//!   by a CAS loop, honoring size, fill rate, debt and wait ceilings.
//! - [`container`]: one immutable-shape topology per config revision:
//!   static buckets, capped dynamic buckets materialised on first use,
//!   default fall-throughs.
//! - [`reaper`]: background pruning of idle dynamic buckets.
//! - [`events`]: bounded, drop-newest fan-out of lifecycle events.
//! - [`engine`]: the `allow` / `get_info` / `update` pipeline plus the
//!   config watcher that swaps the active topology atomically.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use quotad::{
//!     BucketConfig, Engine, MemoryBackend, MemorySource, NamespaceConfig, ReaperConfig,
//!     ServiceConfig,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut cfg = ServiceConfig::new();
//! let mut ns = NamespaceConfig::new("api");
//! ns.add_bucket("search", BucketConfig { size: 10, fill_rate: 5, ..Default::default() })
//!     .unwrap();
//! cfg.add_namespace(ns).unwrap();
//!
//! let engine = Engine::new(
//!     Arc::new(MemoryBackend::new()),
//!     Arc::new(MemorySource::with_initial(cfg)),
//!     ReaperConfig::default(),
//!     1024,
//! );
//! engine.start().unwrap();
//!
//! let allowance = engine.allow("api", "search", 1, None).unwrap();
//! assert_eq!(allowance.granted, 1);
//! // Sleep off allowance.wait before using the tokens.
//! # }
//! ```

pub mod bucket;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod events;
pub mod reaper;

pub use bucket::{Bucket, BucketBackend, MemoryBackend};
pub use config::{
    BucketConfig, ConfigError, ConfigSource, FileSource, MemorySource, NamespaceConfig,
    ServiceConfig,
};
pub use container::BucketContainer;
pub use engine::{Allowance, BucketInfo, Engine};
pub use error::AllowError;
pub use events::{Event, EventEmitter, EventType};
pub use reaper::ReaperConfig;
