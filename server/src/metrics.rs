use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters the host can poll.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    connections: AtomicU64,
    messages_routed: AtomicU64,
    messages_dropped: AtomicU64,
    framebuffers_evicted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections: u64,
    pub messages_routed: u64,
    pub messages_dropped: u64,
    pub framebuffers_evicted: u64,
}

impl ServerMetrics {
    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_routed(&self) {
        self.messages_routed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: usize) {
        self.framebuffers_evicted
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn evictions(&self) -> u64 {
        self.framebuffers_evicted.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            framebuffers_evicted: self.framebuffers_evicted.load(Ordering::Relaxed),
        }
    }
}
