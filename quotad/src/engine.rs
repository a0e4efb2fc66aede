//! Quota engine
//!
//! Ties the pieces together: resolves buckets through the active
//! [`BucketContainer`], serves `allow` / `get_info` / `update`, emits
//! lifecycle events, and watches the config source so a committed revision
//! swaps the whole bucket topology atomically. The active container is an
//! `ArcSwap`: readers load it wait-free, the watcher stores a replacement
//! wait-free, and in-flight requests finish against whichever revision
//! they resolved.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::bucket::BucketBackend;
use crate::config::{BucketConfig, ConfigError, ConfigSource, ServiceConfig};
use crate::container::{BucketContainer, FindMiss};
use crate::error::AllowError;
use crate::events::{self, Event, EventEmitter};
use crate::reaper::{self, ReaperConfig};

/// A granted allowance: sleep off `wait`, then the tokens are yours. The
/// engine never sleeps itself, and the debit stands even if the caller
/// abandons the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub granted: i64,
    pub wait: Duration,
}

/// The configuration triple reported by `get_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketInfo {
    pub size: i64,
    pub fill_rate: i64,
    pub wait_timeout_millis: i64,
}

type Listener = Box<dyn Fn(Event) + Send + Sync>;

struct Shared {
    backend: Arc<dyn BucketBackend>,
    source: Arc<dyn ConfigSource>,
    reaper_cfg: ReaperConfig,
    emitter: EventEmitter,
    active: ArcSwap<BucketContainer>,
    internal_errors: AtomicU64,
}

impl Shared {
    /// Build a container for a validated config and start its reaper.
    fn install(self: &Arc<Self>, cfg: ServiceConfig) -> Arc<BucketContainer> {
        let container = Arc::new(BucketContainer::new(
            cfg,
            Arc::clone(&self.backend),
            self.emitter.clone(),
        ));
        reaper::spawn(Arc::clone(&container), self.reaper_cfg);
        container
    }

    /// Read, validate and commit a candidate revision. Any failure keeps
    /// the prior revision serving.
    fn reload(self: &Arc<Self>) {
        let mut candidate = match self.source.read() {
            Ok(Some(cfg)) => cfg,
            Ok(None) => {
                tracing::warn!("config source notified but has no readable revision");
                self.emitter.emit(Event::config_update_failed());
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to read candidate configuration");
                self.emitter.emit(Event::config_update_failed());
                return;
            }
        };
        candidate.normalize();
        if let Err(e) = candidate.validate() {
            tracing::error!(error = %e, "rejecting invalid configuration, keeping prior revision");
            self.emitter.emit(Event::config_update_failed());
            return;
        }

        let version = self.active.load().config().version + 1;
        candidate.version = version;

        let fresh = self.install(candidate);
        let old = self.active.swap(fresh);
        old.retire();

        self.emitter.emit(Event::config_update_success(version));
        tracing::info!(version, "committed configuration revision");
    }
}

pub struct Engine {
    shared: Arc<Shared>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    listener: Mutex<Option<Listener>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        backend: Arc<dyn BucketBackend>,
        source: Arc<dyn ConfigSource>,
        reaper_cfg: ReaperConfig,
        event_buffer: usize,
    ) -> Self {
        let (emitter, events_rx) = events::channel(event_buffer);
        let empty = Arc::new(BucketContainer::new(
            ServiceConfig::default(),
            Arc::clone(&backend),
            emitter.clone(),
        ));
        let (shutdown_tx, _) = watch::channel(false);

        Engine {
            shared: Arc::new(Shared {
                backend,
                source,
                reaper_cfg,
                emitter,
                active: ArcSwap::new(empty),
                internal_errors: AtomicU64::new(0),
            }),
            events_rx: Mutex::new(Some(events_rx)),
            listener: Mutex::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register the event listener. Must be called before [`Engine::start`];
    /// events emitted with no listener registered are drained and dropped.
    pub fn set_listener(&self, listener: impl Fn(Event) + Send + Sync + 'static) {
        *self.listener.lock() = Some(Box::new(listener));
    }

    /// Load the initial configuration, build the first container, and
    /// spawn the event dispatcher and config watcher. Requires a tokio
    /// runtime.
    pub fn start(&self) -> Result<(), ConfigError> {
        // Subscribe before the initial read so a persist racing startup is
        // never missed.
        let mut changes = self.shared.source.subscribe();

        let mut initial = self.shared.source.read()?.unwrap_or_default();
        initial.normalize();
        initial.validate()?;
        let first = self.shared.install(initial);
        self.shared.active.store(first);

        let mut tasks = self.tasks.lock();

        let listener = self.listener.lock().take();
        if let Some(mut rx) = self.events_rx.lock().take() {
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    if let Some(listener) = &listener {
                        listener(event);
                    }
                }
            }));
        }

        let shared = Arc::clone(&self.shared);
        let mut shutdown = self.shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    notification = changes.recv() => match notification {
                        Some(()) => shared.reload(),
                        None => break,
                    },
                }
            }
        }));

        Ok(())
    }

    /// Retire the active revision and stop the watcher. In-flight calls
    /// complete against the buckets they already resolved.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.active.load().retire();
    }

    /// Decide whether `tokens` may be consumed from `namespace:name`,
    /// creating a dynamic bucket if the namespace allows it. On success the
    /// caller owes a sleep of `wait` before using the tokens.
    pub fn allow(
        &self,
        namespace: &str,
        name: &str,
        tokens: i64,
        max_wait_override: Option<Duration>,
    ) -> Result<Allowance, AllowError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(AllowError::InvalidRequest(
                "namespace and bucket name must be non-empty".to_string(),
            ));
        }
        if tokens < 0 {
            return Err(AllowError::InvalidRequest(format!(
                "negative token count {tokens}"
            )));
        }

        let container = self.shared.active.load_full();
        let found = match container.find(namespace, name) {
            Ok(found) => found,
            Err(FindMiss::NoBucket) => {
                self.shared
                    .emitter
                    .emit(Event::bucket_miss(namespace, name, false));
                return Err(AllowError::NoBucket {
                    namespace: namespace.to_string(),
                    bucket: name.to_string(),
                });
            }
            Err(FindMiss::TooManyBuckets) => {
                self.shared
                    .emitter
                    .emit(Event::bucket_miss(namespace, name, true));
                return Err(AllowError::TooManyBuckets {
                    namespace: namespace.to_string(),
                    bucket: name.to_string(),
                });
            }
        };

        let bucket = found.bucket;
        let cfg = bucket.config();
        let dynamic = bucket.dynamic();

        if cfg.max_tokens_per_request > 0 && tokens > cfg.max_tokens_per_request {
            self.shared.emitter.emit(Event::too_many_tokens_requested(
                namespace, name, dynamic, tokens,
            ));
            return Err(AllowError::TooManyTokensRequested {
                requested: tokens,
                max: cfg.max_tokens_per_request,
            });
        }

        let effective_wait = max_wait_override
            .unwrap_or_else(|| Duration::from_millis(cfg.wait_timeout_millis.max(0) as u64));

        // A panicking backend must not take the serving thread down with
        // it; it surfaces as an internal error.
        let outcome = catch_unwind(AssertUnwindSafe(|| bucket.take(tokens, effective_wait)));
        match outcome {
            Err(_) => {
                self.shared.internal_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(namespace, bucket = name, "bucket backend panicked in take");
                Err(AllowError::Internal(
                    "bucket backend panicked".to_string(),
                ))
            }
            Ok(None) => {
                self.shared.emitter.emit(Event::timeout_serving_tokens(
                    namespace, name, dynamic, tokens,
                ));
                Err(AllowError::Timeout {
                    namespace: namespace.to_string(),
                    bucket: name.to_string(),
                })
            }
            Ok(Some(wait)) => {
                self.shared
                    .emitter
                    .emit(Event::tokens_served(namespace, name, dynamic, tokens, wait));
                Ok(Allowance {
                    granted: tokens,
                    wait,
                })
            }
        }
    }

    /// Report a bucket's configuration triple. Read-only for the topology:
    /// never creates a dynamic bucket.
    pub fn get_info(&self, namespace: &str, name: &str) -> Result<BucketInfo, AllowError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(AllowError::InvalidRequest(
                "namespace and bucket name must be non-empty".to_string(),
            ));
        }

        let container = self.shared.active.load_full();
        match container.find_existing(namespace, name) {
            Some(bucket) => {
                let cfg = bucket.config();
                Ok(BucketInfo {
                    size: cfg.size,
                    fill_rate: cfg.fill_rate,
                    wait_timeout_millis: cfg.wait_timeout_millis,
                })
            }
            None => Err(AllowError::NoBucket {
                namespace: namespace.to_string(),
                bucket: name.to_string(),
            }),
        }
    }

    /// Submit a bucket change through the config source. The change is not
    /// applied in-process; it reaches traffic only when the watcher commits
    /// the persisted revision.
    pub fn update(
        &self,
        namespace: &str,
        name: &str,
        size: i64,
        fill_rate: i64,
        wait_timeout_millis: i64,
    ) -> Result<(), AllowError> {
        if namespace.is_empty() || name.is_empty() {
            return Err(AllowError::InvalidRequest(
                "namespace and bucket name must be non-empty".to_string(),
            ));
        }

        let mut cfg = match self.shared.source.read() {
            Ok(Some(cfg)) => cfg,
            Ok(None) => self.shared.active.load().config().as_ref().clone(),
            Err(e) => return Err(AllowError::Internal(e.to_string())),
        };
        cfg.normalize();

        let Some(ns) = cfg.namespaces.get_mut(namespace) else {
            return Err(AllowError::NoBucket {
                namespace: namespace.to_string(),
                bucket: name.to_string(),
            });
        };

        match ns.buckets.get_mut(name) {
            Some(bucket) => {
                bucket.size = size;
                bucket.fill_rate = fill_rate;
                bucket.wait_timeout_millis = wait_timeout_millis;
            }
            None => {
                ns.buckets.insert(
                    name.to_string(),
                    BucketConfig {
                        size,
                        fill_rate,
                        wait_timeout_millis,
                        ..Default::default()
                    },
                );
            }
        }

        cfg.validate()
            .map_err(|e| AllowError::InvalidRequest(e.to_string()))?;
        self.shared
            .source
            .persist(&cfg)
            .map_err(|e| AllowError::Internal(e.to_string()))
    }

    /// Prior config revisions, oldest first (admin surface).
    pub fn historical_configs(&self) -> Result<Vec<ServiceConfig>, ConfigError> {
        self.shared.source.historical()
    }

    /// Version of the revision currently serving traffic.
    pub fn current_version(&self) -> u64 {
        self.shared.active.load().config().version
    }

    /// Live dynamic buckets in a namespace of the active revision.
    pub fn dynamic_bucket_count(&self, namespace: &str) -> usize {
        self.shared.active.load().dynamic_count(namespace)
    }

    /// Events dropped on event-buffer overflow.
    pub fn dropped_events(&self) -> u64 {
        self.shared.emitter.dropped()
    }

    /// Backend faults caught at the engine boundary.
    pub fn internal_errors(&self) -> u64 {
        self.shared.internal_errors.load(Ordering::Relaxed)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.active.load().retire();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}
