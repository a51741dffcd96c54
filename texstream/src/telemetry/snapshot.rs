//! Point-in-time telemetry snapshot.

use std::fmt;

use serde::Serialize;

/// Copy of the streaming counters at one instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub requests_admitted: u64,
    pub requests_updated: u64,
    pub requests_stale: u64,
    pub cancellations: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    pub late_completions: u64,
    pub packets_sent: u64,
    pub ticks: u64,
    pub ticks_blocked: u64,
    pub uptime_ms: u64,
    pub packets_per_second: f64,
}

impl StreamSnapshot {
    /// Fraction of ticks that stopped on an undecoded transfer.
    pub fn blocked_ratio(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.ticks_blocked as f64 / self.ticks as f64
        }
    }
}

impl fmt::Display for StreamSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Requests:  {} admitted, {} updated, {} stale, {} cancelled",
            self.requests_admitted, self.requests_updated, self.requests_stale, self.cancellations
        )?;
        writeln!(
            f,
            "Transfers: {} completed, {} failed, {} late completions",
            self.transfers_completed, self.transfers_failed, self.late_completions
        )?;
        write!(
            f,
            "Packets:   {} sent in {} ticks ({:.1}/s, {:.0}% ticks blocked)",
            self.packets_sent,
            self.ticks,
            self.packets_per_second,
            self.blocked_ratio() * 100.0
        )
    }
}
