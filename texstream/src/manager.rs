//! Per-client image manager.
//!
//! [`ImageManager`] wires the router, pipeline, completion applier and
//! scheduler around one priority index:
//!
//! ```text
//!   submit ──► RequestRouter ──► PriorityIndex ◄── PacketScheduler ◄── run_tick
//!                  │                  ▲                   │
//!                  ▼                  │                   ▼
//!            FetchPipeline ──► CompletionQueue        PacketSink
//!          (AssetSource, Decoder)   (applied on submit, tick,
//!                                    or process_next_completion)
//! ```
//!
//! `submit` may be called from any task; `run_tick` should be driven by a
//! single owner (see [`ClientSession`](crate::session::ClientSession)).

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::StreamConfig;
use crate::lifecycle::TransferLifecycle;
use crate::pipeline::{CompletionQueue, FetchPipeline};
use crate::router::{RequestRouter, SubmitOutcome};
use crate::scheduler::PacketScheduler;
use crate::source::{AssetSource, Decoder};
use crate::telemetry::{StreamMetrics, StreamSnapshot};
use crate::transfer::{AgentId, TextureId, TextureRequest, TransferInfo};
use crate::transport::PacketSink;

/// Progressive texture delivery for one connected client.
pub struct ImageManager {
    config: StreamConfig,
    lifecycle: Arc<TransferLifecycle>,
    router: RequestRouter,
    scheduler: PacketScheduler,
    completions: CompletionQueue,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
}

impl ImageManager {
    /// Create a manager for `agent`.
    ///
    /// Fetch/decode tasks are spawned on `runtime`.
    pub fn new(
        agent: AgentId,
        config: StreamConfig,
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn Decoder>,
        sink: Arc<dyn PacketSink>,
        runtime: Handle,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let metrics = Arc::new(StreamMetrics::new());
        let lifecycle = Arc::new(TransferLifecycle::new(
            agent,
            config.fallback.clone(),
            sink,
            metrics.clone(),
            shutdown.clone(),
        ));
        let (pipeline, completions) =
            FetchPipeline::new(assets, decoder, runtime, shutdown.clone());

        Self {
            router: RequestRouter::new(lifecycle.clone(), pipeline),
            scheduler: PacketScheduler::new(lifecycle.clone(), config.stall_timeout),
            lifecycle,
            completions,
            metrics,
            shutdown,
            config,
        }
    }

    pub fn agent(&self) -> AgentId {
        self.lifecycle.agent()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Admit, update or cancel a transfer.
    ///
    /// Admissions and updates also apply any completions already queued, so
    /// a decoded transfer picks up its new discard level straight away.
    pub fn submit(&self, request: &TextureRequest) -> SubmitOutcome {
        let outcome = self.router.submit(request);
        if matches!(outcome, SubmitOutcome::Admitted | SubmitOutcome::Updated) {
            self.apply_completions();
        }
        outcome
    }

    /// Run one tick with the configured packet budget.
    pub fn run_tick(&self) -> bool {
        self.run_tick_with_budget(self.config.packets_per_tick)
    }

    /// Run one tick sending at most `budget` packets.
    ///
    /// Returns `false` iff no transfer remains afterwards (always `false`
    /// once shut down).
    pub fn run_tick_with_budget(&self, budget: u32) -> bool {
        if self.is_shut_down() {
            return false;
        }
        self.apply_completions();
        self.scheduler.run_tick(budget)
    }

    /// Apply every completion queued right now. Returns how many applied.
    pub fn apply_completions(&self) -> usize {
        self.completions
            .drain()
            .into_iter()
            .map(|completion| self.lifecycle.apply(completion))
            .filter(|applied| *applied)
            .count()
    }

    /// Wait for the next pipeline completion and apply it.
    ///
    /// Returns `false` once the manager is shut down.
    pub async fn process_next_completion(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            completion = self.completions.recv() => match completion {
                Some(completion) => {
                    self.lifecycle.apply(completion);
                    true
                }
                None => false,
            },
        }
    }

    /// Stop admission, drop every transfer and discard pending completions.
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let dropped = self.lifecycle.teardown();
        let discarded = self.completions.drain().len();
        for _ in 0..discarded {
            self.metrics.late_completion();
        }
        info!(
            agent = %self.agent(),
            dropped,
            discarded,
            "Image manager shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of live transfers.
    pub fn count(&self) -> usize {
        self.lifecycle.index().count()
    }

    /// The highest-priority live transfer.
    pub fn peek_max(&self) -> Option<TransferInfo> {
        self.lifecycle
            .index()
            .peek_max()
            .map(|shared| shared.lock().info())
    }

    /// The live transfer for `texture`, if any.
    pub fn transfer_info(&self, texture: TextureId) -> Option<TransferInfo> {
        self.lifecycle
            .index()
            .find_by_key(&texture)
            .map(|shared| shared.lock().info())
    }

    /// Whether `texture` failed since the last shutdown.
    pub fn has_failed(&self, texture: TextureId) -> bool {
        self.lifecycle.has_failed(texture)
    }

    pub fn metrics(&self) -> StreamSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for ImageManager {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            debug!(agent = %self.agent(), "Image manager dropped without shutdown");
            self.shutdown.cancel();
        }
    }
}
