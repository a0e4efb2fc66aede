//! End-to-end engine behavior: event sequences, dynamic buckets, reaping,
//! and online reconfiguration.

use std::sync::Arc;
use std::time::Duration;

use quotad::{
    AllowError, BucketConfig, ConfigSource, Engine, Event, EventType, MemoryBackend, MemorySource,
    NamespaceConfig, ReaperConfig, ServiceConfig,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Harness {
    engine: Engine,
    events: mpsc::UnboundedReceiver<Event>,
    source: Arc<MemorySource>,
}

impl Harness {
    fn start(cfg: ServiceConfig) -> Self {
        let source = Arc::new(MemorySource::with_initial(cfg));
        let engine = Engine::new(
            Arc::new(MemoryBackend::new()),
            Arc::clone(&source) as Arc<dyn ConfigSource>,
            ReaperConfig::for_tests(),
            100,
        );

        let (tx, events) = mpsc::unbounded_channel();
        engine.set_listener(move |event| {
            let _ = tx.send(event);
        });
        engine.start().unwrap();

        Harness {
            engine,
            events,
            source,
        }
    }

    async fn next_event(&mut self) -> Event {
        timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_event(
        &mut self,
        namespace: &str,
        bucket: &str,
        dynamic: bool,
        event_type: EventType,
        num_tokens: i64,
    ) -> Event {
        let event = self.next_event().await;
        assert_eq!(event.namespace, namespace, "event {event:?}");
        assert_eq!(event.bucket_name, bucket, "event {event:?}");
        assert_eq!(event.dynamic, dynamic, "event {event:?}");
        assert_eq!(event.event_type, event_type, "event {event:?}");
        assert_eq!(event.num_tokens, num_tokens, "event {event:?}");
        event
    }

    async fn drain_events(&mut self, count: usize) {
        for _ in 0..count {
            self.next_event().await;
        }
    }
}

/// The topology the Go-era service test ran against: a static namespace, a
/// capped dynamic namespace, and a reapable dynamic namespace.
fn service_config() -> ServiceConfig {
    let mut cfg = ServiceConfig::new();
    cfg.global_default_bucket = Some(BucketConfig::default());

    let mut dynamic = NamespaceConfig::new("dyn");
    dynamic.set_dynamic_bucket_template(BucketConfig {
        max_tokens_per_request: 5,
        ..Default::default()
    });
    dynamic.max_dynamic_buckets = 2;
    cfg.add_namespace(dynamic).unwrap();

    let mut gc = NamespaceConfig::new("dyn_gc");
    gc.set_dynamic_bucket_template(BucketConfig {
        max_tokens_per_request: 5,
        max_idle_millis: 100,
        ..Default::default()
    });
    gc.max_dynamic_buckets = 3;
    cfg.add_namespace(gc).unwrap();

    let mut nodyn = NamespaceConfig::new("nodyn");
    nodyn
        .add_bucket(
            "b",
            BucketConfig {
                max_tokens_per_request: 10,
                ..Default::default()
            },
        )
        .unwrap();
    cfg.add_namespace(nodyn).unwrap();

    cfg
}

#[tokio::test]
async fn tokens_served_from_static_bucket() {
    let mut h = Harness::start(service_config());

    let allowance = h.engine.allow("nodyn", "b", 1, None).unwrap();
    assert_eq!(allowance.granted, 1);
    assert_eq!(allowance.wait, Duration::ZERO);

    h.expect_event("nodyn", "b", false, EventType::TokensServed, 1)
        .await;
}

#[tokio::test]
async fn over_limit_request_is_rejected() {
    let mut h = Harness::start(service_config());

    match h.engine.allow("nodyn", "b", 100, None) {
        Err(AllowError::TooManyTokensRequested { requested, max }) => {
            assert_eq!(requested, 100);
            assert_eq!(max, 10);
        }
        other => panic!("expected TooManyTokensRequested, got {other:?}"),
    }

    h.expect_event("nodyn", "b", false, EventType::TooManyTokensRequested, 100)
        .await;
}

#[tokio::test]
async fn unknown_bucket_in_known_namespace_misses() {
    let mut h = Harness::start(service_config());

    assert!(matches!(
        h.engine.allow("nodyn", "x", 1, None),
        Err(AllowError::NoBucket { .. })
    ));
    h.expect_event("nodyn", "x", false, EventType::BucketMiss, 0)
        .await;
}

#[tokio::test]
async fn unknown_namespace_serves_from_global_default() {
    let mut h = Harness::start(service_config());

    let allowance = h.engine.allow("nowhere", "anything", 1, None).unwrap();
    assert_eq!(allowance.granted, 1);
    h.expect_event("nowhere", "anything", false, EventType::TokensServed, 1)
        .await;
}

#[tokio::test]
async fn dynamic_bucket_created_before_serving() {
    let mut h = Harness::start(service_config());

    h.engine.allow("dyn", "b", 1, None).unwrap();

    h.expect_event("dyn", "b", true, EventType::BucketCreated, 0)
        .await;
    h.expect_event("dyn", "b", true, EventType::TokensServed, 1)
        .await;
}

#[tokio::test]
async fn dynamic_cap_rejects_third_bucket() {
    let mut h = Harness::start(service_config());

    h.engine.allow("dyn", "a", 1, None).unwrap();
    h.engine.allow("dyn", "b", 1, None).unwrap();
    h.drain_events(4).await; // two creations, two serves

    assert!(matches!(
        h.engine.allow("dyn", "c", 1, None),
        Err(AllowError::TooManyBuckets { .. })
    ));
    h.expect_event("dyn", "c", true, EventType::BucketMiss, 0)
        .await;
    assert_eq!(h.engine.dynamic_bucket_count("dyn"), 2);
}

#[tokio::test]
async fn dynamic_template_enforces_token_ceiling() {
    let mut h = Harness::start(service_config());

    assert!(matches!(
        h.engine.allow("dyn", "a", 6, None),
        Err(AllowError::TooManyTokensRequested { .. })
    ));

    // The bucket is materialised by resolution before the ceiling check.
    h.expect_event("dyn", "a", true, EventType::BucketCreated, 0)
        .await;
    h.expect_event("dyn", "a", true, EventType::TooManyTokensRequested, 6)
        .await;
}

#[tokio::test]
async fn second_caller_waits_one_fill_interval() {
    let mut cfg = ServiceConfig::new();
    let mut ns = NamespaceConfig::new("slow");
    ns.add_bucket(
        "b",
        BucketConfig {
            size: 1,
            fill_rate: 1,
            wait_timeout_millis: 2000,
            ..Default::default()
        },
    )
    .unwrap();
    cfg.add_namespace(ns).unwrap();
    let h = Harness::start(cfg);

    let first = h.engine.allow("slow", "b", 1, None).unwrap();
    assert_eq!(first.wait, Duration::ZERO);

    let second = h.engine.allow("slow", "b", 1, None).unwrap();
    assert!(
        second.wait > Duration::from_millis(500) && second.wait <= Duration::from_millis(1000),
        "wait was {:?}",
        second.wait
    );
}

#[tokio::test]
async fn wait_past_timeout_is_rejected() {
    let mut cfg = ServiceConfig::new();
    let mut ns = NamespaceConfig::new("strict");
    ns.add_bucket(
        "b",
        BucketConfig {
            size: 1,
            fill_rate: 1,
            wait_timeout_millis: 500,
            ..Default::default()
        },
    )
    .unwrap();
    cfg.add_namespace(ns).unwrap();
    let mut h = Harness::start(cfg);

    h.engine.allow("strict", "b", 1, None).unwrap();
    assert!(matches!(
        h.engine.allow("strict", "b", 1, None),
        Err(AllowError::Timeout { .. })
    ));

    h.expect_event("strict", "b", false, EventType::TokensServed, 1)
        .await;
    h.expect_event("strict", "b", false, EventType::TimeoutServingTokens, 1)
        .await;
}

#[tokio::test]
async fn idle_dynamic_buckets_are_reaped() {
    let mut h = Harness::start(service_config());

    for name in ["b", "c", "d"] {
        h.engine.allow("dyn_gc", name, 1, None).unwrap();
    }
    h.drain_events(6).await; // three creations, three serves

    // The reaper sweeps every 100ms; two sweeps (clear, then collect) are
    // enough to remove all three untouched buckets.
    let mut removed = Vec::new();
    for _ in 0..3 {
        let event = h.next_event().await;
        assert_eq!(event.event_type, EventType::BucketRemoved);
        assert_eq!(event.namespace, "dyn_gc");
        assert!(event.dynamic);
        removed.push(event.bucket_name);
    }
    removed.sort();
    assert_eq!(removed, vec!["b", "c", "d"]);
    assert_eq!(h.engine.dynamic_bucket_count("dyn_gc"), 0);
}

#[tokio::test]
async fn get_info_reports_config_without_creating_buckets() {
    let mut h = Harness::start(service_config());

    let info = h.engine.get_info("nodyn", "b").unwrap();
    assert_eq!(info.size, 100);
    assert_eq!(info.fill_rate, 50);
    assert_eq!(info.wait_timeout_millis, 1000);

    // Read-only for the topology: no dynamic bucket appears.
    assert!(matches!(
        h.engine.get_info("dyn", "ghost"),
        Err(AllowError::NoBucket { .. })
    ));
    assert_eq!(h.engine.dynamic_bucket_count("dyn"), 0);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn committed_config_swaps_topology_atomically() {
    let mut h = Harness::start(service_config());
    assert_eq!(h.engine.current_version(), 0);
    h.engine.allow("nodyn", "b", 1, None).unwrap();
    h.drain_events(1).await;

    let mut replacement = ServiceConfig::new();
    let mut ns = NamespaceConfig::new("swapped");
    ns.add_bucket("c", BucketConfig::default()).unwrap();
    replacement.add_namespace(ns).unwrap();
    h.source.persist(&replacement).unwrap();

    let event = h.next_event().await;
    assert_eq!(event.event_type, EventType::ConfigUpdateSuccess);
    assert_eq!(event.num_tokens, 1); // committed version

    // After the commit every new allow sees only the new topology.
    assert_eq!(h.engine.current_version(), 1);
    h.engine.allow("swapped", "c", 1, None).unwrap();
    assert!(matches!(
        h.engine.allow("nodyn", "b", 1, None),
        Err(AllowError::NoBucket { .. })
    ));
}

#[tokio::test]
async fn invalid_config_keeps_prior_revision() {
    let mut h = Harness::start(service_config());

    let mut broken = ServiceConfig::new();
    let mut ns = NamespaceConfig::new("broken");
    ns.add_bucket(
        "b",
        BucketConfig {
            fill_rate: 0,
            ..Default::default()
        },
    )
    .unwrap();
    broken.add_namespace(ns).unwrap();
    h.source.persist(&broken).unwrap();

    let event = h.next_event().await;
    assert_eq!(event.event_type, EventType::ConfigUpdateFailed);

    assert_eq!(h.engine.current_version(), 0);
    h.engine.allow("nodyn", "b", 1, None).unwrap();
}

#[tokio::test]
async fn update_takes_effect_through_the_commit_path() {
    let mut h = Harness::start(service_config());

    h.engine.update("nodyn", "b", 42, 7, 1234).unwrap();

    let event = h.next_event().await;
    assert_eq!(event.event_type, EventType::ConfigUpdateSuccess);

    let info = h.engine.get_info("nodyn", "b").unwrap();
    assert_eq!(info.size, 42);
    assert_eq!(info.fill_rate, 7);
    assert_eq!(info.wait_timeout_millis, 1234);

    // Unknown bucket names become new static buckets in the namespace;
    // unknown namespaces do not.
    h.engine.update("nodyn", "fresh", 5, 5, 5).unwrap();
    let event = h.next_event().await;
    assert_eq!(event.event_type, EventType::ConfigUpdateSuccess);
    assert_eq!(h.engine.get_info("nodyn", "fresh").unwrap().size, 5);

    assert!(matches!(
        h.engine.update("nowhere", "b", 1, 1, 1),
        Err(AllowError::NoBucket { .. })
    ));
}

#[tokio::test]
async fn invalid_requests_are_rejected_at_the_boundary() {
    let h = Harness::start(service_config());

    assert!(matches!(
        h.engine.allow("", "b", 1, None),
        Err(AllowError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.engine.allow("nodyn", "", 1, None),
        Err(AllowError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.engine.allow("nodyn", "b", -1, None),
        Err(AllowError::InvalidRequest(_))
    ));
    assert!(matches!(
        h.engine.update("nodyn", "b", -1, 1, 1),
        Err(AllowError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn max_wait_override_tightens_the_ceiling() {
    let mut cfg = ServiceConfig::new();
    let mut ns = NamespaceConfig::new("slow");
    ns.add_bucket(
        "b",
        BucketConfig {
            size: 1,
            fill_rate: 1,
            wait_timeout_millis: 5000,
            ..Default::default()
        },
    )
    .unwrap();
    cfg.add_namespace(ns).unwrap();
    let h = Harness::start(cfg);

    h.engine.allow("slow", "b", 1, None).unwrap();
    // Override below the ~1s required wait: poll-style rejection.
    assert!(matches!(
        h.engine
            .allow("slow", "b", 1, Some(Duration::from_millis(10))),
        Err(AllowError::Timeout { .. })
    ));
    // Without the override the configured 5s ceiling admits the wait.
    let allowance = h.engine.allow("slow", "b", 1, None).unwrap();
    assert!(allowance.wait > Duration::from_millis(500));
}
