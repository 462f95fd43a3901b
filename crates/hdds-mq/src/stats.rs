// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queue statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Message counters for one queue.
#[derive(Debug)]
pub struct QueueStats {
    /// Messages handed to `dispatch`.
    pub messages_dispatched: AtomicU64,

    /// Messages a consumer accepted.
    pub messages_delivered: AtomicU64,

    /// Messages that had to wait in a pending queue.
    pub messages_held: AtomicU64,

    /// Held messages whose endpoint did not appear in time.
    pub messages_timed_out: AtomicU64,

    /// Submission refused, consumer error or consumer panic.
    pub messages_failed: AtomicU64,

    /// Messages without destination, rejected by a handler, or released on
    /// shutdown.
    pub messages_dropped: AtomicU64,

    /// Queue creation time.
    pub created: Instant,
}

impl QueueStats {
    pub fn new() -> Self {
        Self {
            messages_dispatched: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            messages_held: AtomicU64::new(0),
            messages_timed_out: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    pub fn record_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_held(&self) {
        self.messages_held.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.messages_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.messages_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.record_dropped_n(1);
    }

    pub fn record_dropped_n(&self, n: u64) {
        self.messages_dropped.fetch_add(n, Ordering::Relaxed);
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_held: self.messages_held.load(Ordering::Relaxed),
            messages_timed_out: self.messages_timed_out.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for QueueStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of queue statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatsSnapshot {
    pub messages_dispatched: u64,
    pub messages_delivered: u64,
    pub messages_held: u64,
    pub messages_timed_out: u64,
    pub messages_failed: u64,
    pub messages_dropped: u64,
    pub uptime_secs: u64,
}

impl QueueStatsSnapshot {
    /// Calculate delivered messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_delivered as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Messages dispatched but not yet resolved one way or another.
    pub fn in_flight(&self) -> u64 {
        self.messages_dispatched.saturating_sub(
            self.messages_delivered
                + self.messages_timed_out
                + self.messages_failed
                + self.messages_dropped,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats::new();

        for _ in 0..5 {
            stats.record_dispatched();
        }
        stats.record_delivered();
        stats.record_delivered();
        stats.record_held();
        stats.record_timed_out();
        stats.record_failed();
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_dispatched, 5);
        assert_eq!(snapshot.messages_delivered, 2);
        assert_eq!(snapshot.messages_held, 1);
        assert_eq!(snapshot.messages_timed_out, 1);
        assert_eq!(snapshot.messages_failed, 1);
        assert_eq!(snapshot.messages_dropped, 1);
        assert_eq!(snapshot.in_flight(), 0);
    }

    #[test]
    fn test_messages_per_second_without_uptime() {
        let snapshot = QueueStats::new().snapshot();
        assert_eq!(snapshot.messages_per_second(), 0.0);
    }
}
