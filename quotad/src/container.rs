//! Bucket container
//!
//! One container holds the entire bucket topology for a single config
//! revision: per-namespace static buckets, capped dynamic buckets, default
//! fall-throughs and the global default. Containers are immutable in shape
//! once built (only the dynamic maps change), so swapping revisions is a
//! pointer store in the engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::bucket::{Bucket, BucketBackend};
use crate::config::{BucketConfig, ServiceConfig};
use crate::events::{Event, EventEmitter};

/// Synthetic bucket name used when materialising default buckets.
pub const DEFAULT_BUCKET_NAME: &str = "___DEFAULT_BUCKET___";
/// Synthetic namespace owning the global default bucket.
pub const GLOBAL_NAMESPACE: &str = "___GLOBAL___";

/// Why `find` could not produce a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FindMiss {
    /// Nothing resolvable and no default path applied.
    NoBucket,
    /// Dynamic creation denied by the namespace cap.
    TooManyBuckets,
}

pub(crate) struct Found {
    pub bucket: Arc<dyn Bucket>,
    /// Whether this call materialised the bucket.
    pub created: bool,
}

impl Found {
    fn existing(bucket: &Arc<dyn Bucket>) -> Self {
        Found {
            bucket: Arc::clone(bucket),
            created: false,
        }
    }
}

struct Namespace {
    default_bucket: Option<Arc<dyn Bucket>>,
    template: Option<Arc<BucketConfig>>,
    max_dynamic_buckets: i64,
    statics: HashMap<String, Arc<dyn Bucket>>,
    /// Coarse per-namespace lock: steady-state lookups take it for read
    /// only; dynamic creation double-checks under the write lock, which
    /// makes first-time creation single-flight.
    dynamics: RwLock<HashMap<String, Arc<dyn Bucket>>>,
}

pub struct BucketContainer {
    cfg: Arc<ServiceConfig>,
    backend: Arc<dyn BucketBackend>,
    namespaces: HashMap<String, Namespace>,
    global_default: Option<Arc<dyn Bucket>>,
    emitter: EventEmitter,
    retired_tx: watch::Sender<bool>,
}

impl BucketContainer {
    /// Materialise all static buckets for a validated config.
    pub fn new(
        cfg: ServiceConfig,
        backend: Arc<dyn BucketBackend>,
        emitter: EventEmitter,
    ) -> Self {
        let cfg = Arc::new(cfg);
        let global_default = cfg.global_default_bucket.as_ref().map(|b| {
            backend.create(
                GLOBAL_NAMESPACE,
                DEFAULT_BUCKET_NAME,
                Arc::new(b.clone()),
                false,
            )
        });

        let namespaces = cfg
            .namespaces
            .iter()
            .map(|(name, ns_cfg)| {
                let statics = ns_cfg
                    .buckets
                    .iter()
                    .map(|(bucket_name, bucket_cfg)| {
                        let bucket = backend.create(
                            name,
                            bucket_name,
                            Arc::new(bucket_cfg.clone()),
                            false,
                        );
                        (bucket_name.clone(), bucket)
                    })
                    .collect();

                let default_bucket = ns_cfg.default_bucket.as_ref().map(|b| {
                    backend.create(name, DEFAULT_BUCKET_NAME, Arc::new(b.clone()), false)
                });

                let ns = Namespace {
                    default_bucket,
                    template: ns_cfg
                        .dynamic_bucket_template
                        .as_ref()
                        .map(|t| Arc::new(t.clone())),
                    max_dynamic_buckets: ns_cfg.max_dynamic_buckets,
                    statics,
                    dynamics: RwLock::new(HashMap::new()),
                };
                (name.clone(), ns)
            })
            .collect();

        let (retired_tx, _) = watch::channel(false);
        BucketContainer {
            cfg,
            backend,
            namespaces,
            global_default,
            emitter,
            retired_tx,
        }
    }

    pub fn config(&self) -> &Arc<ServiceConfig> {
        &self.cfg
    }

    /// Resolve a bucket, creating a dynamic one when the namespace allows
    /// it. Fall-through order: namespace miss goes to the global default;
    /// within a namespace, statics, then live dynamics, then template
    /// creation under the cap, then the namespace default.
    pub(crate) fn find(&self, namespace: &str, name: &str) -> Result<Found, FindMiss> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return match &self.global_default {
                Some(bucket) => Ok(Found::existing(bucket)),
                None => Err(FindMiss::NoBucket),
            };
        };

        if let Some(bucket) = ns.statics.get(name) {
            return Ok(Found::existing(bucket));
        }
        if let Some(bucket) = ns.dynamics.read().get(name) {
            return Ok(Found::existing(bucket));
        }

        if let Some(template) = &ns.template {
            let mut dynamics = ns.dynamics.write();
            // A concurrent first access may have won the race.
            if let Some(bucket) = dynamics.get(name) {
                return Ok(Found::existing(bucket));
            }
            if (dynamics.len() as i64) < ns.max_dynamic_buckets {
                let bucket = self.backend.create(namespace, name, Arc::clone(template), true);
                dynamics.insert(name.to_string(), Arc::clone(&bucket));
                self.emitter.emit(Event::bucket_created(namespace, name, true));
                return Ok(Found {
                    bucket,
                    created: true,
                });
            }
            drop(dynamics);

            return match &ns.default_bucket {
                Some(bucket) => Ok(Found::existing(bucket)),
                None => Err(FindMiss::TooManyBuckets),
            };
        }

        match &ns.default_bucket {
            Some(bucket) => Ok(Found::existing(bucket)),
            None => Err(FindMiss::NoBucket),
        }
    }

    /// Read-only resolution: same fall-through as `find` but never
    /// materialises a dynamic bucket.
    pub(crate) fn find_existing(&self, namespace: &str, name: &str) -> Option<Arc<dyn Bucket>> {
        let Some(ns) = self.namespaces.get(namespace) else {
            return self.global_default.clone();
        };
        if let Some(bucket) = ns.statics.get(name) {
            return Some(Arc::clone(bucket));
        }
        if let Some(bucket) = ns.dynamics.read().get(name) {
            return Some(Arc::clone(bucket));
        }
        ns.default_bucket.clone()
    }

    /// Remove one dynamic bucket. Emits `BUCKET_REMOVED` when something was
    /// actually removed; holders of the Arc finish their in-flight takes
    /// against the detached bucket.
    pub(crate) fn remove_dynamic(&self, namespace: &str, name: &str) -> bool {
        let Some(ns) = self.namespaces.get(namespace) else {
            return false;
        };
        let removed = ns.dynamics.write().remove(name).is_some();
        if removed {
            self.emitter.emit(Event::bucket_removed(namespace, name, true));
        }
        removed
    }

    /// One reaper sweep: remove every dynamic bucket that allows reaping
    /// and saw no activity since the previous sweep. Buckets touched since
    /// then survive with a cleared activity flag. Returns how many buckets
    /// were removed.
    pub(crate) fn sweep_idle(&self) -> usize {
        let mut removed = 0;
        for (ns_name, ns) in &self.namespaces {
            let condemned: Vec<(String, Arc<dyn Bucket>)> = ns
                .dynamics
                .read()
                .iter()
                .filter(|(_, bucket)| {
                    bucket.config().max_idle_millis >= 0 && !bucket.activity_detected()
                })
                .map(|(name, bucket)| (name.clone(), Arc::clone(bucket)))
                .collect();

            if condemned.is_empty() {
                continue;
            }

            let mut dynamics = ns.dynamics.write();
            for (name, bucket) in condemned {
                // Identity check: never remove a bucket that was recreated
                // under the same name since the scan.
                let same = dynamics
                    .get(&name)
                    .is_some_and(|current| Arc::ptr_eq(current, &bucket));
                if same {
                    dynamics.remove(&name);
                    self.emitter.emit(Event::bucket_removed(ns_name, &name, true));
                    removed += 1;
                }
            }
        }
        removed
    }

    /// Current number of live dynamic buckets in a namespace.
    pub fn dynamic_count(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|ns| ns.dynamics.read().len())
            .unwrap_or(0)
    }

    /// Signal the reaper owned by this revision to stop.
    pub(crate) fn retire(&self) {
        let _ = self.retired_tx.send(true);
    }

    pub(crate) fn retired(&self) -> watch::Receiver<bool> {
        self.retired_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBackend;
    use crate::config::{BucketConfig, NamespaceConfig};
    use crate::events::{self, EventType};
    use std::time::Duration;

    fn container_for(cfg: ServiceConfig) -> (BucketContainer, tokio::sync::mpsc::Receiver<Event>) {
        let (emitter, rx) = events::channel(128);
        let container = BucketContainer::new(cfg, Arc::new(MemoryBackend::new()), emitter);
        (container, rx)
    }

    fn dynamic_namespace(name: &str, cap: i64) -> NamespaceConfig {
        let mut ns = NamespaceConfig::new(name);
        ns.set_dynamic_bucket_template(BucketConfig::default());
        ns.max_dynamic_buckets = cap;
        ns
    }

    #[test]
    fn static_lookup_hits() {
        let mut cfg = ServiceConfig::new();
        let mut ns = NamespaceConfig::new("api");
        ns.add_bucket("search", BucketConfig::default()).unwrap();
        cfg.add_namespace(ns).unwrap();

        let (container, _rx) = container_for(cfg);
        let found = container.find("api", "search").unwrap();
        assert!(!found.created);
        assert!(!found.bucket.dynamic());
        assert!(matches!(
            container.find("api", "absent"),
            Err(FindMiss::NoBucket)
        ));
    }

    #[test]
    fn namespace_default_and_global_default_fall_through() {
        let mut cfg = ServiceConfig::new();
        cfg.global_default_bucket = Some(BucketConfig::default());
        let mut ns = NamespaceConfig::new("with_default");
        ns.default_bucket = Some(BucketConfig {
            size: 7,
            ..Default::default()
        });
        cfg.add_namespace(ns).unwrap();
        cfg.add_namespace(NamespaceConfig::new("bare")).unwrap();

        let (container, _rx) = container_for(cfg);

        // Unknown bucket in a namespace with a default: the default.
        let found = container.find("with_default", "anything").unwrap();
        assert_eq!(found.bucket.config().size, 7);

        // Unknown bucket in a namespace without one: a miss, not the
        // global default (that only covers unknown namespaces).
        assert!(matches!(
            container.find("bare", "anything"),
            Err(FindMiss::NoBucket)
        ));

        // Unknown namespace: the global default.
        let found = container.find("nope", "anything").unwrap();
        assert_eq!(found.bucket.config().size, 100);
    }

    #[test]
    fn dynamic_creation_respects_cap() {
        let mut cfg = ServiceConfig::new();
        cfg.add_namespace(dynamic_namespace("dyn", 2)).unwrap();
        let (container, mut rx) = container_for(cfg);

        assert!(container.find("dyn", "a").unwrap().created);
        assert!(container.find("dyn", "b").unwrap().created);
        assert!(!container.find("dyn", "a").unwrap().created);
        assert!(matches!(
            container.find("dyn", "c"),
            Err(FindMiss::TooManyBuckets)
        ));
        assert_eq!(container.dynamic_count("dyn"), 2);

        for expected in ["a", "b"] {
            let event = rx.try_recv().unwrap();
            assert_eq!(event.event_type, EventType::BucketCreated);
            assert_eq!(event.bucket_name, expected);
            assert!(event.dynamic);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn zero_cap_disables_creation_even_with_template() {
        let mut cfg = ServiceConfig::new();
        cfg.add_namespace(dynamic_namespace("dyn", 0)).unwrap();
        let (container, _rx) = container_for(cfg);
        assert!(matches!(
            container.find("dyn", "a"),
            Err(FindMiss::TooManyBuckets)
        ));
    }

    #[test]
    fn cap_overflow_falls_back_to_namespace_default() {
        let mut cfg = ServiceConfig::new();
        let mut ns = dynamic_namespace("dyn", 1);
        ns.default_bucket = Some(BucketConfig {
            size: 3,
            ..Default::default()
        });
        cfg.add_namespace(ns).unwrap();
        let (container, _rx) = container_for(cfg);

        assert!(container.find("dyn", "a").unwrap().created);
        let fallback = container.find("dyn", "b").unwrap();
        assert!(!fallback.created);
        assert_eq!(fallback.bucket.config().size, 3);
    }

    #[test]
    fn concurrent_first_access_creates_exactly_once() {
        let mut cfg = ServiceConfig::new();
        cfg.add_namespace(dynamic_namespace("dyn", 10)).unwrap();
        let (container, mut rx) = container_for(cfg);
        let container = Arc::new(container);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let container = Arc::clone(&container);
                std::thread::spawn(move || container.find("dyn", "hot").unwrap().created)
            })
            .collect();
        let created: usize = handles
            .into_iter()
            .map(|h| usize::from(h.join().unwrap()))
            .sum();

        assert_eq!(created, 1);
        assert_eq!(container.dynamic_count("dyn"), 1);
        assert_eq!(rx.try_recv().unwrap().event_type, EventType::BucketCreated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn removal_frees_a_slot_and_emits() {
        let mut cfg = ServiceConfig::new();
        cfg.add_namespace(dynamic_namespace("dyn", 1)).unwrap();
        let (container, mut rx) = container_for(cfg);

        container.find("dyn", "a").unwrap();
        assert!(matches!(
            container.find("dyn", "b"),
            Err(FindMiss::TooManyBuckets)
        ));

        assert!(container.remove_dynamic("dyn", "a"));
        assert!(!container.remove_dynamic("dyn", "a"));
        assert_eq!(container.dynamic_count("dyn"), 0);
        assert!(container.find("dyn", "b").unwrap().created);

        let kinds: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.event_type)
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventType::BucketCreated,
                EventType::BucketRemoved,
                EventType::BucketCreated
            ]
        );
    }

    #[test]
    fn sweep_removes_only_idle_reapable_buckets() {
        let mut cfg = ServiceConfig::new();
        let mut ns = NamespaceConfig::new("gc");
        ns.set_dynamic_bucket_template(BucketConfig {
            max_idle_millis: 100,
            ..Default::default()
        });
        ns.max_dynamic_buckets = 10;
        cfg.add_namespace(ns).unwrap();

        let mut no_reap = NamespaceConfig::new("keep");
        no_reap.set_dynamic_bucket_template(BucketConfig::default()); // max_idle -1
        no_reap.max_dynamic_buckets = 10;
        cfg.add_namespace(no_reap).unwrap();

        let (container, _rx) = container_for(cfg);

        let busy = container.find("gc", "busy").unwrap().bucket;
        container.find("gc", "idle").unwrap();
        container.find("keep", "idle").unwrap();

        busy.take(1, Duration::from_secs(1));
        assert_eq!(container.sweep_idle(), 1);
        assert_eq!(container.dynamic_count("gc"), 1);
        assert_eq!(container.dynamic_count("keep"), 1);

        // The survivor's flag was cleared by the sweep; left alone it goes
        // next time.
        assert_eq!(container.sweep_idle(), 1);
        assert_eq!(container.dynamic_count("gc"), 0);
    }

    #[test]
    fn find_existing_never_creates() {
        let mut cfg = ServiceConfig::new();
        cfg.add_namespace(dynamic_namespace("dyn", 10)).unwrap();
        let (container, mut rx) = container_for(cfg);

        assert!(container.find_existing("dyn", "a").is_none());
        assert_eq!(container.dynamic_count("dyn"), 0);
        assert!(rx.try_recv().is_err());

        container.find("dyn", "a").unwrap();
        assert!(container.find_existing("dyn", "a").is_some());
    }
}
