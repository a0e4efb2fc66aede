//! Idle dynamic bucket reaper
//!
//! One background task per container revision. Each sweep removes dynamic
//! buckets that allow reaping and saw no activity since the previous
//! sweep; the sweep itself lives in [`BucketContainer::sweep_idle`]. The
//! task is bound to the revision it was started with, so a config swap can
//! never make it touch newer state, and retiring the container stops it
//! promptly without blocking teardown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::container::BucketContainer;

#[derive(Debug, Clone, Copy)]
pub struct ReaperConfig {
    /// Floor on the wake interval between sweeps.
    pub min_frequency: Duration,
    /// Delay before the first sweep.
    pub init_sleep: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        ReaperConfig {
            min_frequency: Duration::from_secs(60),
            init_sleep: Duration::from_secs(30),
        }
    }
}

impl ReaperConfig {
    /// Tight intervals for tests that exercise reaping end to end.
    pub fn for_tests() -> Self {
        ReaperConfig {
            min_frequency: Duration::from_millis(100),
            init_sleep: Duration::from_millis(100),
        }
    }
}

pub(crate) fn spawn(container: Arc<BucketContainer>, cfg: ReaperConfig) -> JoinHandle<()> {
    let mut retired = container.retired();
    tokio::spawn(async move {
        let floor = cfg.min_frequency.max(Duration::from_millis(1));
        let mut sleep_for = cfg.init_sleep;
        loop {
            if *retired.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let removed = container.sweep_idle();
                    if removed > 0 {
                        tracing::debug!(removed, "reaped idle dynamic buckets");
                    }
                    sleep_for = floor;
                }
                changed = retired.changed() => {
                    if changed.is_err() || *retired.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::MemoryBackend;
    use crate::config::{BucketConfig, NamespaceConfig, ServiceConfig};
    use crate::events;

    fn gc_container() -> Arc<BucketContainer> {
        let mut cfg = ServiceConfig::new();
        let mut ns = NamespaceConfig::new("gc");
        ns.set_dynamic_bucket_template(BucketConfig {
            max_idle_millis: 100,
            ..Default::default()
        });
        ns.max_dynamic_buckets = 10;
        cfg.add_namespace(ns).unwrap();

        let (emitter, _rx) = events::channel(64);
        Arc::new(BucketContainer::new(
            cfg,
            Arc::new(MemoryBackend::new()),
            emitter,
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_idle_buckets_on_schedule() {
        let container = gc_container();
        for name in ["a", "b", "c"] {
            container.find("gc", name).unwrap();
        }

        let handle = spawn(Arc::clone(&container), ReaperConfig::for_tests());

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(container.dynamic_count("gc"), 0);

        container.retire();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn retire_stops_the_task_before_the_first_sweep() {
        let container = gc_container();
        container.find("gc", "a").unwrap();

        let handle = spawn(
            Arc::clone(&container),
            ReaperConfig {
                min_frequency: Duration::from_secs(3600),
                init_sleep: Duration::from_secs(3600),
            },
        );

        container.retire();
        handle.await.unwrap();
        assert_eq!(container.dynamic_count("gc"), 1);
    }
}
