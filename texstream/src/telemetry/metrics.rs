//! Atomic counters for the streaming core.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::snapshot::StreamSnapshot;

/// Counters shared by every component of one client's streaming core.
#[derive(Debug)]
pub struct StreamMetrics {
    requests_admitted: AtomicU64,
    requests_updated: AtomicU64,
    requests_stale: AtomicU64,
    cancellations: AtomicU64,
    transfers_completed: AtomicU64,
    transfers_failed: AtomicU64,
    late_completions: AtomicU64,
    packets_sent: AtomicU64,
    ticks: AtomicU64,
    ticks_blocked: AtomicU64,
    started_at: Instant,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self {
            requests_admitted: AtomicU64::new(0),
            requests_updated: AtomicU64::new(0),
            requests_stale: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            transfers_completed: AtomicU64::new(0),
            transfers_failed: AtomicU64::new(0),
            late_completions: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            ticks_blocked: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn request_admitted(&self) {
        self.requests_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_updated(&self) {
        self.requests_updated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_stale(&self) {
        self.requests_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_cancelled(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_completed(&self) {
        self.transfers_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A pipeline completion arrived for a transfer that no longer exists.
    pub fn late_completion(&self) {
        self.late_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn packets_sent(&self, count: u32) {
        self.packets_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// A tick stopped early because the top transfer was not decoded.
    pub fn tick_blocked(&self) {
        self.ticks_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StreamSnapshot {
        let elapsed = self.started_at.elapsed();
        let packets_sent = self.packets_sent.load(Ordering::Relaxed);
        let secs = elapsed.as_secs_f64();

        StreamSnapshot {
            requests_admitted: self.requests_admitted.load(Ordering::Relaxed),
            requests_updated: self.requests_updated.load(Ordering::Relaxed),
            requests_stale: self.requests_stale.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            late_completions: self.late_completions.load(Ordering::Relaxed),
            packets_sent,
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_blocked: self.ticks_blocked.load(Ordering::Relaxed),
            uptime_ms: elapsed.as_millis() as u64,
            packets_per_second: if secs > 0.0 {
                packets_sent as f64 / secs
            } else {
                0.0
            },
        }
    }
}

impl Default for StreamMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_start_at_zero() {
        let snapshot = StreamMetrics::new().snapshot();
        assert_eq!(snapshot.requests_admitted, 0);
        assert_eq!(snapshot.packets_sent, 0);
        assert_eq!(snapshot.ticks_blocked, 0);
    }

    #[test]
    fn test_counters_accumulate_across_threads() {
        let metrics = Arc::new(StreamMetrics::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        metrics.packets_sent(2);
                        metrics.tick();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.packets_sent, 2000);
        assert_eq!(snapshot.ticks, 1000);
    }
}
