//! Reference in-memory token bucket
//!
//! The classical token bucket expressed as an accumulating deadline rather
//! than a stored token count: each bucket carries a single atomic stamp,
//! the instant at which the next token would be generated if the bucket
//! were empty. Taking `n` tokens pushes the stamp `n` token-intervals into
//! the future; how far past "full capacity" the stamp may run is bounded by
//! the debt ceiling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crate::config::BucketConfig;

use super::{Bucket, BucketBackend};

const NANOS_PER_SEC: i64 = 1_000_000_000;
const NANOS_PER_MILLI: i64 = 1_000_000;

/// Backend producing [`TokenBucket`]s. All buckets from one backend share a
/// monotonic clock anchor so their deadlines are comparable.
pub struct MemoryBackend {
    anchor: Instant,
}

impl MemoryBackend {
    pub fn new() -> Self {
        MemoryBackend {
            anchor: Instant::now(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend::new()
    }
}

impl BucketBackend for MemoryBackend {
    fn create(
        &self,
        _namespace: &str,
        _name: &str,
        cfg: Arc<BucketConfig>,
        dynamic: bool,
    ) -> Arc<dyn Bucket> {
        Arc::new(TokenBucket::new(cfg, dynamic, self.anchor))
    }
}

/// A single in-memory token bucket.
pub struct TokenBucket {
    cfg: Arc<BucketConfig>,
    dynamic: bool,
    anchor: Instant,
    nanos_per_token: i64,
    /// Instant (nanos on the anchor scale) at which the next token is
    /// earned. Only ever advanced, and only by the CAS loop in
    /// [`TokenBucket::take_at`].
    next_available: AtomicI64,
    touched: AtomicBool,
}

impl TokenBucket {
    fn new(cfg: Arc<BucketConfig>, dynamic: bool, anchor: Instant) -> Self {
        // fill_rate > 0 is enforced by config validation; the max(1) guards
        // fill rates above 1e9 tokens/sec from collapsing to a zero
        // interval.
        let nanos_per_token = (NANOS_PER_SEC / cfg.fill_rate.max(1)).max(1);
        let now = elapsed_nanos(anchor);
        TokenBucket {
            cfg,
            dynamic,
            anchor,
            nanos_per_token,
            next_available: AtomicI64::new(now),
            touched: AtomicBool::new(false),
        }
    }

    /// The clocked entry point: `now` is nanoseconds on this bucket's
    /// monotonic scale. [`Bucket::take`] feeds it the anchored clock; tests
    /// feed it synthetic instants.
    pub fn take_at(&self, tokens: i64, max_wait: Duration, now: i64) -> Option<Duration> {
        if tokens == 0 {
            return Some(Duration::ZERO);
        }
        self.touched.store(true, Ordering::Release);

        let request_nanos = tokens.saturating_mul(self.nanos_per_token);
        let ceiling = duration_nanos(max_wait)
            .min(self.cfg.wait_timeout_millis.saturating_mul(NANOS_PER_MILLI));
        let debt_limit = self.cfg.max_debt_millis.saturating_mul(NANOS_PER_MILLI);
        let fresh_capacity =
            now.saturating_add(self.cfg.size.saturating_mul(self.nanos_per_token));

        let claimed = self
            .next_available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |prev| {
                let grant_at = prev.max(now).saturating_add(request_nanos);

                // Tokens past the full-capacity horizon are drawn from the
                // future; bound how deep that overdraft may project.
                let overdraft = grant_at.saturating_sub(fresh_capacity);
                if overdraft > 0 && overdraft.saturating_sub(request_nanos) > debt_limit {
                    return None;
                }

                // Wait until the first of the n tokens exists.
                if prev.saturating_sub(now) > ceiling {
                    return None;
                }

                Some(grant_at)
            })
            .ok()?;

        Some(Duration::from_nanos(
            claimed.saturating_sub(now).max(0) as u64
        ))
    }

    #[cfg(test)]
    fn deadline(&self) -> i64 {
        self.next_available.load(Ordering::Acquire)
    }
}

impl Bucket for TokenBucket {
    fn config(&self) -> Arc<BucketConfig> {
        Arc::clone(&self.cfg)
    }

    fn dynamic(&self) -> bool {
        self.dynamic
    }

    fn activity_detected(&self) -> bool {
        self.touched.swap(false, Ordering::AcqRel)
    }

    fn take(&self, tokens: i64, max_wait: Duration) -> Option<Duration> {
        self.take_at(tokens, max_wait, elapsed_nanos(self.anchor))
    }
}

fn elapsed_nanos(anchor: Instant) -> i64 {
    anchor.elapsed().as_nanos().min(i64::MAX as u128) as i64
}

fn duration_nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}
