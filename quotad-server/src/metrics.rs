//! Lightweight request metrics
//!
//! Atomic counters only, no allocations on the hot path. Exposed as a JSON
//! snapshot on the HTTP transport's `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::types::Status;

#[derive(Debug, Clone, Copy)]
pub enum TransportKind {
    Http,
    Native,
}

pub struct Metrics {
    start_time: Instant,
    total_requests: AtomicU64,
    http_requests: AtomicU64,
    native_requests: AtomicU64,
    allowed: AtomicU64,
    denied: AtomicU64,
    timeouts: AtomicU64,
    server_errors: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            http_requests: AtomicU64::new(0),
            native_requests: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            server_errors: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self, transport: TransportKind) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match transport {
            TransportKind::Http => self.http_requests.fetch_add(1, Ordering::Relaxed),
            TransportKind::Native => self.native_requests.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_outcome(&self, status: Status) {
        match status {
            Status::Ok => {
                self.allowed.fetch_add(1, Ordering::Relaxed);
            }
            Status::RejectedTimeout => {
                self.denied.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Status::RejectedServerError => {
                self.denied.fetch_add(1, Ordering::Relaxed);
                self.server_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {
                self.denied.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            total_requests: self.total_requests.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            native_requests: self.native_requests.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            server_errors: self.server_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub total_requests: u64,
    pub http_requests: u64,
    pub native_requests: u64,
    pub allowed: u64,
    pub denied: u64,
    pub timeouts: u64,
    pub server_errors: u64,
}
