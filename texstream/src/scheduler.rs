//! Budgeted packet scheduling.
//!
//! Each tick drains up to `budget` packets from the highest-priority
//! transfers:
//!
//! ```text
//! loop while sent < budget:
//!   peek max ── empty ──────────────► false
//!      │
//!      ├── not decoded ─────────────► true   (wait for the pipeline)
//!      │
//!      └── send(budget - sent)
//!            ├── done ──► remove, next
//!            └── budget spent ──────► count > 0
//! ```
//!
//! A tick never spins: every iteration either sends, removes a transfer, or
//! ends the tick.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::TransferError;
use crate::lifecycle::TransferLifecycle;

pub(crate) struct PacketScheduler {
    lifecycle: Arc<TransferLifecycle>,
    stall_timeout: Option<Duration>,
}

impl PacketScheduler {
    pub(crate) fn new(lifecycle: Arc<TransferLifecycle>, stall_timeout: Option<Duration>) -> Self {
        Self {
            lifecycle,
            stall_timeout,
        }
    }

    /// Send up to `budget` packets. Returns `false` iff no transfer remains.
    pub(crate) fn run_tick(&self, budget: u32) -> bool {
        let lifecycle = &self.lifecycle;
        let index = lifecycle.index();
        lifecycle.metrics().tick();

        let mut sent = 0u32;
        let has_more = loop {
            if lifecycle.is_shut_down() || sent >= budget {
                break index.count() > 0;
            }

            let Some(shared) = index.peek_max() else {
                break false;
            };
            let mut transfer = shared.lock();

            // Removed between peek and lock; look again.
            if transfer.state().is_terminal() {
                continue;
            }

            if !transfer.is_ready() {
                if let Some(timeout) = self.stall_timeout {
                    let waited = transfer.age();
                    if transfer.state().is_pending() && waited > timeout {
                        lifecycle.fail(&mut transfer, &TransferError::Stalled { waited, timeout });
                        continue;
                    }
                }
                trace!(
                    texture = %transfer.texture(),
                    state = %transfer.state(),
                    "Top transfer not decoded, ending tick"
                );
                lifecycle.metrics().tick_blocked();
                break true;
            }

            let (count, done) =
                transfer.send_packets(lifecycle.sink(), lifecycle.agent(), budget - sent);
            sent += count;

            if done {
                lifecycle.complete(&mut transfer);
                continue;
            }

            break index.count() > 0;
        };

        lifecycle.metrics().packets_sent(sent);
        if sent > 0 {
            debug!(sent, budget, remaining = index.count(), "Tick sent packets");
        }
        has_more
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::source::DecodedImage;
    use crate::telemetry::StreamMetrics;
    use crate::transfer::{
        AgentId, LayerBoundary, SharedTransfer, TextureId, TextureRequest, Transfer, TransferState,
    };
    use crate::transport::{ImagePacket, RecordingSink};
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    /// 600-byte header plus `data_packets` full data packets.
    fn image(data_packets: usize) -> Arc<DecodedImage> {
        let len = 600 + data_packets * 1000;
        Arc::new(DecodedImage::new(
            Bytes::from(vec![0u8; len]),
            vec![LayerBoundary::new(0, len)],
        ))
    }

    struct Fixture {
        lifecycle: Arc<TransferLifecycle>,
        sink: Arc<RecordingSink>,
        shutdown: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let sink = Arc::new(RecordingSink::new());
            let shutdown = CancellationToken::new();
            let lifecycle = Arc::new(TransferLifecycle::new(
                AgentId::random(),
                FallbackPolicy::none(),
                sink.clone(),
                Arc::new(StreamMetrics::new()),
                shutdown.clone(),
            ));
            Self {
                lifecycle,
                sink,
                shutdown,
            }
        }

        fn scheduler(&self) -> PacketScheduler {
            PacketScheduler::new(self.lifecycle.clone(), None)
        }

        fn add(&self, priority: f32, decoded: Option<Arc<DecodedImage>>) -> SharedTransfer {
            let texture = TextureId::random();
            let mut transfer = Transfer::from_request(&TextureRequest::new(texture, priority));
            if let Some(image) = decoded {
                transfer.mark_decoded(image).unwrap();
            }
            let shared = Arc::new(Mutex::new(transfer));
            let handle = self
                .lifecycle
                .index()
                .insert(texture, shared.clone(), priority)
                .unwrap();
            shared.lock().set_handle(handle);
            shared
        }
    }

    #[test]
    fn test_empty_index_returns_false() {
        let f = Fixture::new();
        assert!(!f.scheduler().run_tick(10));
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_partial_send_keeps_transfer() {
        let f = Fixture::new();
        // Header already out: ten data packets remain.
        let shared = f.add(1.0, Some(image(10)));
        shared
            .lock()
            .send_packets(&RecordingSink::new(), AgentId::random(), 1);

        assert!(f.scheduler().run_tick(5));

        assert_eq!(f.sink.len(), 5);
        assert_eq!(f.lifecycle.index().count(), 1);
        assert_eq!(shared.lock().send_cursor(), 6);
    }

    #[test]
    fn test_undecoded_top_blocks_tick() {
        let f = Fixture::new();
        let shared = f.add(1.0, None);

        assert!(f.scheduler().run_tick(10));

        assert!(f.sink.is_empty());
        assert_eq!(f.lifecycle.index().count(), 1);
        assert_eq!(shared.lock().state(), TransferState::AwaitingAsset);
        assert_eq!(f.lifecycle.metrics().snapshot().ticks_blocked, 1);
    }

    #[test]
    fn test_undecoded_top_blocks_lower_ready_transfer() {
        let f = Fixture::new();
        f.add(10.0, None);
        f.add(1.0, Some(image(2)));

        assert!(f.scheduler().run_tick(10));
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_completed_transfers_removed_and_tick_continues() {
        let f = Fixture::new();
        let first = f.add(10.0, Some(image(2)));
        let second = f.add(5.0, Some(image(1)));

        // 3 packets for the first, 2 for the second.
        assert!(!f.scheduler().run_tick(10));

        assert_eq!(f.sink.len(), 5);
        assert_eq!(f.lifecycle.index().count(), 0);
        assert_eq!(first.lock().state(), TransferState::Complete);
        assert_eq!(second.lock().state(), TransferState::Complete);

        let packets = f.sink.packets();
        assert!(matches!(packets[0], ImagePacket::Header(_)));
        assert_eq!(packets[1].packet_number(), Some(1));
        assert_eq!(packets[2].packet_number(), Some(2));
        assert!(matches!(packets[3], ImagePacket::Header(_)));
    }

    #[test]
    fn test_budget_never_exceeded() {
        let f = Fixture::new();
        for i in 0..6 {
            f.add(i as f32, Some(image(3)));
        }

        let scheduler = f.scheduler();
        let mut ticks = 0;
        while scheduler.run_tick(7) {
            ticks += 1;
            assert!(f.sink.len() <= 7 * ticks);
        }

        // 6 transfers of 4 packets each.
        assert_eq!(f.sink.len(), 24);
        assert_eq!(f.lifecycle.index().count(), 0);
    }

    #[test]
    fn test_zero_budget_sends_nothing() {
        let f = Fixture::new();
        f.add(1.0, Some(image(1)));

        assert!(f.scheduler().run_tick(0));
        assert!(f.sink.is_empty());
    }

    #[test]
    fn test_stall_timeout_fails_and_continues() {
        let f = Fixture::new();
        let stalled = f.add(10.0, None);
        f.add(1.0, Some(image(1)));

        let scheduler = PacketScheduler::new(f.lifecycle.clone(), Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(2));

        assert!(!scheduler.run_tick(10));

        assert_eq!(stalled.lock().state(), TransferState::Failed);
        let packets = f.sink.packets();
        assert!(matches!(packets[0], ImagePacket::NotFound { .. }));
        assert_eq!(packets.len(), 3);
    }

    #[test]
    fn test_tick_after_shutdown_sends_nothing() {
        let f = Fixture::new();
        f.add(1.0, Some(image(1)));
        f.shutdown.cancel();
        f.lifecycle.teardown();

        assert!(!f.scheduler().run_tick(10));
        assert!(f.sink.is_empty());
    }
}
