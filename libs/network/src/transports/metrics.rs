//! Transport Traffic Metrics
//!
//! Lock-free counters shared between a service handle and its I/O tasks.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Traffic counters for one service
#[derive(Clone, Default)]
pub struct TrafficMetrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    retransmits: AtomicU64,
    errors: AtomicU64,
    /// Error code -> occurrences
    error_codes: RwLock<HashMap<i32, u64>>,
    last_activity: RwLock<Option<Instant>>,
}

/// Point-in-time copy of [`TrafficMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmits: u64,
    pub errors: u64,
    pub error_codes: HashMap<i32, u64>,
    pub last_activity: Option<Instant>,
}

impl TrafficMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_send(&self, bytes: usize) {
        self.inner.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.inner.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.inner.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.inner.frames_received.fetch_add(1, Ordering::Relaxed);
        self.inner
            .bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        *self.inner.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_retransmit(&self) {
        self.inner.retransmits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, code: i32) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
        *self.inner.error_codes.write().entry(code).or_insert(0) += 1;
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            frames_sent: self.inner.frames_sent.load(Ordering::Relaxed),
            frames_received: self.inner.frames_received.load(Ordering::Relaxed),
            bytes_sent: self.inner.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.inner.bytes_received.load(Ordering::Relaxed),
            retransmits: self.inner.retransmits.load(Ordering::Relaxed),
            errors: self.inner.errors.load(Ordering::Relaxed),
            error_codes: self.inner.error_codes.read().clone(),
            last_activity: *self.inner.last_activity.read(),
        }
    }
}
