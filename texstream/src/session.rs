//! Session driver: the single owner that ticks one client's manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::manager::ImageManager;
use crate::telemetry::StreamSnapshot;

/// Drives `run_tick` at a fixed cadence and applies completions as they
/// arrive, until cancelled.
pub struct ClientSession {
    manager: Arc<ImageManager>,
    tick_interval: Duration,
}

impl ClientSession {
    /// Create a session ticking at the manager's configured interval.
    pub fn new(manager: Arc<ImageManager>) -> Self {
        let tick_interval = manager.config().tick_interval;
        Self {
            manager,
            tick_interval,
        }
    }

    /// Override the tick interval.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn manager(&self) -> &Arc<ImageManager> {
        &self.manager
    }

    /// Run until `shutdown` fires or the manager is shut down, then shut the
    /// manager down and return its final counters.
    pub async fn run(self, shutdown: CancellationToken) -> StreamSnapshot {
        info!(
            agent = %self.manager.agent(),
            tick_ms = self.tick_interval.as_millis() as u64,
            "Client session starting"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                _ = ticker.tick() => {
                    self.manager.run_tick();
                }

                applied = self.manager.process_next_completion() => {
                    if !applied {
                        break;
                    }
                }
            }
        }

        self.manager.shutdown();
        let snapshot = self.manager.metrics();
        info!(
            agent = %self.manager.agent(),
            packets = snapshot.packets_sent,
            completed = snapshot.transfers_completed,
            "Client session stopped"
        );
        snapshot
    }
}
