//! Lifecycle and service events
//!
//! Producers on the serving path (container, engine, config watcher) push
//! into a bounded channel with `try_send`: when the buffer is full the
//! newest event is dropped and counted, so event reporting can never slow,
//! fail or deadlock a request. A single dispatcher task drains the channel
//! into the registered listener.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    BucketCreated,
    BucketRemoved,
    BucketMiss,
    TokensServed,
    TooManyTokensRequested,
    TimeoutServingTokens,
    ConfigUpdateSuccess,
    ConfigUpdateFailed,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub namespace: String,
    pub bucket_name: String,
    pub dynamic: bool,
    pub event_type: EventType,
    pub num_tokens: i64,
    pub wait_time: Duration,
}

impl Event {
    fn new(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        event_type: EventType,
        num_tokens: i64,
        wait_time: Duration,
    ) -> Self {
        Event {
            namespace: namespace.to_string(),
            bucket_name: bucket_name.to_string(),
            dynamic,
            event_type,
            num_tokens,
            wait_time,
        }
    }

    pub fn bucket_created(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::BucketCreated,
            0,
            Duration::ZERO,
        )
    }

    pub fn bucket_removed(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::BucketRemoved,
            0,
            Duration::ZERO,
        )
    }

    pub fn bucket_miss(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::BucketMiss,
            0,
            Duration::ZERO,
        )
    }

    pub fn tokens_served(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        num_tokens: i64,
        wait_time: Duration,
    ) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::TokensServed,
            num_tokens,
            wait_time,
        )
    }

    pub fn too_many_tokens_requested(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        requested: i64,
    ) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::TooManyTokensRequested,
            requested,
            Duration::ZERO,
        )
    }

    pub fn timeout_serving_tokens(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        num_tokens: i64,
    ) -> Self {
        Event::new(
            namespace,
            bucket_name,
            dynamic,
            EventType::TimeoutServingTokens,
            num_tokens,
            Duration::ZERO,
        )
    }

    /// `num_tokens` carries the committed revision number.
    pub fn config_update_success(version: u64) -> Self {
        Event::new(
            "",
            "",
            false,
            EventType::ConfigUpdateSuccess,
            version as i64,
            Duration::ZERO,
        )
    }

    pub fn config_update_failed() -> Self {
        Event::new("", "", false, EventType::ConfigUpdateFailed, 0, Duration::ZERO)
    }
}

/// Cheap clonable producer handle.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Enqueue an event. Overflow drops the event silently; the drop is
    /// counted and never surfaces as a request error.
    pub fn emit(&self, event: Event) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Number of events dropped due to a full buffer.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Build the bounded event channel. The receiver side is consumed by the
/// engine's dispatcher task.
pub fn channel(buffer: usize) -> (EventEmitter, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    (
        EventEmitter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overflow_drops_newest_and_counts() {
        let (emitter, mut rx) = channel(2);

        emitter.emit(Event::bucket_created("ns", "a", true));
        emitter.emit(Event::bucket_created("ns", "b", true));
        emitter.emit(Event::bucket_created("ns", "c", true));

        assert_eq!(emitter.dropped(), 1);
        assert_eq!(rx.recv().await.unwrap().bucket_name, "a");
        assert_eq!(rx.recv().await.unwrap().bucket_name, "b");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn order_is_preserved() {
        let (emitter, mut rx) = channel(16);
        emitter.emit(Event::bucket_created("ns", "b", true));
        emitter.emit(Event::tokens_served("ns", "b", true, 1, Duration::ZERO));

        assert_eq!(rx.recv().await.unwrap().event_type, EventType::BucketCreated);
        assert_eq!(rx.recv().await.unwrap().event_type, EventType::TokensServed);
    }
}
