//! Shared per-client state and the transitions that remove transfers.
//!
//! Every removal from the priority index goes through here, always while
//! holding the transfer's lock: the transfer is retired into a terminal state
//! first, then its handle is released. Anyone who locks a transfer and finds
//! it terminal knows it is already gone from the index.
//!
//! Lock order is transfer, then index. The index never locks transfers.

use std::sync::Arc;

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::FallbackPolicy;
use crate::error::TransferError;
use crate::pipeline::{Completion, CompletionEvent};
use crate::queue::TransferIndex;
use crate::telemetry::StreamMetrics;
use crate::transfer::{AgentId, TextureId, Transfer, TransferState};
use crate::transport::{ImagePacket, PacketSink};

pub(crate) struct TransferLifecycle {
    agent: AgentId,
    index: TransferIndex,
    failed: DashSet<TextureId>,
    fallback: FallbackPolicy,
    sink: Arc<dyn PacketSink>,
    metrics: Arc<StreamMetrics>,
    shutdown: CancellationToken,
}

impl TransferLifecycle {
    pub(crate) fn new(
        agent: AgentId,
        fallback: FallbackPolicy,
        sink: Arc<dyn PacketSink>,
        metrics: Arc<StreamMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            agent,
            index: TransferIndex::new(),
            failed: DashSet::new(),
            fallback,
            sink,
            metrics,
            shutdown,
        }
    }

    pub(crate) fn agent(&self) -> AgentId {
        self.agent
    }

    pub(crate) fn index(&self) -> &TransferIndex {
        &self.index
    }

    pub(crate) fn sink(&self) -> &dyn PacketSink {
        self.sink.as_ref()
    }

    pub(crate) fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Asset to fetch for `texture`: the fallback once the texture has failed.
    pub(crate) fn source_for(&self, texture: TextureId) -> TextureId {
        if !self.failed.contains(&texture) {
            return texture;
        }
        match self.fallback.fallback_for(self.agent) {
            Some(fallback) => {
                debug!(texture = %texture, fallback = %fallback, "Substituting fallback image");
                fallback
            }
            None => texture,
        }
    }

    pub(crate) fn has_failed(&self, texture: TextureId) -> bool {
        self.failed.contains(&texture)
    }

    /// Retire `transfer` into `state` and release its index position.
    fn remove(&self, transfer: &mut Transfer, state: TransferState) {
        if let Some(handle) = transfer.retire(state) {
            if !self.index.delete(handle) {
                trace!(texture = %transfer.texture(), "Handle already released");
            }
        }
    }

    pub(crate) fn cancel(&self, transfer: &mut Transfer) {
        self.remove(transfer, TransferState::Cancelled);
        self.metrics.transfer_cancelled();
        debug!(texture = %transfer.texture(), agent = %self.agent, "Transfer cancelled");
    }

    pub(crate) fn complete(&self, transfer: &mut Transfer) {
        self.remove(transfer, TransferState::Complete);
        self.metrics.transfer_completed();
        debug!(
            texture = %transfer.texture(),
            agent = %self.agent,
            sent_through = transfer.send_cursor().saturating_sub(1),
            "Transfer complete"
        );
    }

    /// Fail a transfer: remove it, remember the identity, notify the client.
    pub(crate) fn fail(&self, transfer: &mut Transfer, error: &TransferError) {
        let texture = transfer.texture();
        self.remove(transfer, TransferState::Failed);
        self.failed.insert(texture);
        self.metrics.transfer_failed();
        warn!(texture = %texture, agent = %self.agent, error = %error, "Transfer failed");
        self.sink
            .send(self.agent, ImagePacket::NotFound { texture });
    }

    /// Apply one pipeline outcome.
    ///
    /// Completions for a transfer that no longer exists, or that was replaced
    /// by a newer instance of the same texture, are discarded. Returns whether
    /// the completion was applied.
    pub(crate) fn apply(&self, completion: Completion) -> bool {
        if self.is_shut_down() {
            self.metrics.late_completion();
            return false;
        }

        let Some(shared) = self.index.find_by_key(&completion.texture) else {
            trace!(
                texture = %completion.texture,
                serial = %completion.serial,
                "Completion for removed transfer"
            );
            self.metrics.late_completion();
            return false;
        };

        let mut transfer = shared.lock();
        if transfer.serial() != completion.serial || transfer.state().is_terminal() {
            trace!(
                texture = %completion.texture,
                serial = %completion.serial,
                "Completion for replaced transfer"
            );
            self.metrics.late_completion();
            return false;
        }

        match completion.event {
            CompletionEvent::AssetFetched => transfer.mark_decoding(),
            CompletionEvent::Decoded(image) => match transfer.mark_decoded(image) {
                Ok(applied) => applied,
                Err(error) => {
                    self.fail(&mut transfer, &TransferError::Decode(error));
                    true
                }
            },
            CompletionEvent::Failed(error) => {
                self.fail(&mut transfer, &error);
                true
            }
        }
    }

    /// Drop every transfer and forget failures. Returns how many were live.
    pub(crate) fn teardown(&self) -> usize {
        let transfers = self.index.clear();
        for shared in &transfers {
            let mut transfer = shared.lock();
            if !transfer.state().is_terminal() {
                // The index is already empty, so the handle is dropped unused.
                let _ = transfer.retire(TransferState::Cancelled);
            }
        }
        self.failed.clear();
        transfers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AssetError, DecodeError};
    use crate::source::DecodedImage;
    use crate::transfer::{LayerBoundary, SharedTransfer, TextureRequest};
    use crate::transport::RecordingSink;
    use bytes::Bytes;
    use parking_lot::Mutex;

    fn lifecycle(fallback: FallbackPolicy) -> (TransferLifecycle, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let lifecycle = TransferLifecycle::new(
            AgentId::random(),
            fallback,
            sink.clone(),
            Arc::new(StreamMetrics::new()),
            CancellationToken::new(),
        );
        (lifecycle, sink)
    }

    fn admit(lifecycle: &TransferLifecycle, texture: TextureId, priority: f32) -> SharedTransfer {
        let shared = Arc::new(Mutex::new(Transfer::from_request(&TextureRequest::new(
            texture, priority,
        ))));
        let handle = lifecycle
            .index()
            .insert(texture, shared.clone(), priority)
            .unwrap();
        shared.lock().set_handle(handle);
        shared
    }

    fn image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(
            Bytes::from(vec![0u8; 3000]),
            vec![LayerBoundary::new(0, 3000)],
        ))
    }

    #[test]
    fn test_cancel_removes_from_index() {
        let (lifecycle, _) = lifecycle(FallbackPolicy::none());
        let texture = TextureId::random();
        let shared = admit(&lifecycle, texture, 1.0);

        lifecycle.cancel(&mut shared.lock());

        assert_eq!(lifecycle.index().count(), 0);
        assert_eq!(shared.lock().state(), TransferState::Cancelled);
        assert!(shared.lock().handle().is_none());
        assert_eq!(lifecycle.metrics().snapshot().cancellations, 1);
    }

    #[test]
    fn test_fail_records_identity_and_notifies() {
        let (lifecycle, sink) = lifecycle(FallbackPolicy::none());
        let texture = TextureId::random();
        let shared = admit(&lifecycle, texture, 1.0);

        let error = TransferError::Fetch(AssetError::NotFound(texture));
        lifecycle.fail(&mut shared.lock(), &error);

        assert!(lifecycle.has_failed(texture));
        assert_eq!(lifecycle.index().count(), 0);
        assert_eq!(sink.packets(), vec![ImagePacket::NotFound { texture }]);
        // No fallback configured: fetch the texture itself again.
        assert_eq!(lifecycle.source_for(texture), texture);
    }

    #[test]
    fn test_failed_texture_uses_fallback() {
        let fallback = TextureId::random();
        let (lifecycle, _) = lifecycle(FallbackPolicy::with_default(fallback));
        let texture = TextureId::random();
        let shared = admit(&lifecycle, texture, 1.0);

        assert_eq!(lifecycle.source_for(texture), texture);
        lifecycle.fail(&mut shared.lock(), &DecodeError::Empty.into());
        assert_eq!(lifecycle.source_for(texture), fallback);
    }

    #[test]
    fn test_apply_walks_state_machine() {
        let (lifecycle, _) = lifecycle(FallbackPolicy::none());
        let texture = TextureId::random();
        let shared = admit(&lifecycle, texture, 1.0);
        let serial = shared.lock().serial();

        assert!(lifecycle.apply(Completion {
            texture,
            serial,
            event: CompletionEvent::AssetFetched,
        }));
        assert_eq!(shared.lock().state(), TransferState::Decoding);

        assert!(lifecycle.apply(Completion {
            texture,
            serial,
            event: CompletionEvent::Decoded(image()),
        }));
        assert!(shared.lock().is_ready());
    }

    #[test]
    fn test_apply_discards_completion_for_old_instance() {
        let (lifecycle, _) = lifecycle(FallbackPolicy::none());
        let texture = TextureId::random();
        let old = admit(&lifecycle, texture, 1.0);
        let old_serial = old.lock().serial();
        lifecycle.cancel(&mut old.lock());

        let fresh = admit(&lifecycle, texture, 1.0);
        let applied = lifecycle.apply(Completion {
            texture,
            serial: old_serial,
            event: CompletionEvent::Decoded(image()),
        });

        assert!(!applied);
        assert_eq!(fresh.lock().state(), TransferState::AwaitingAsset);
        assert_eq!(lifecycle.metrics().snapshot().late_completions, 1);
    }

    #[test]
    fn test_apply_failure_removes_transfer() {
        let (lifecycle, sink) = lifecycle(FallbackPolicy::none());
        let texture = TextureId::random();
        let shared = admit(&lifecycle, texture, 1.0);
        let serial = shared.lock().serial();

        lifecycle.apply(Completion {
            texture,
            serial,
            event: CompletionEvent::Failed(TransferError::Fetch(AssetError::NotFound(texture))),
        });

        assert_eq!(shared.lock().state(), TransferState::Failed);
        assert_eq!(lifecycle.index().count(), 0);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_teardown_clears_everything() {
        let (lifecycle, _) = lifecycle(FallbackPolicy::none());
        let a = admit(&lifecycle, TextureId::random(), 1.0);
        let failed = admit(&lifecycle, TextureId::random(), 2.0);
        let failed_id = failed.lock().texture();
        lifecycle.fail(&mut failed.lock(), &DecodeError::Empty.into());

        assert_eq!(lifecycle.teardown(), 1);
        assert_eq!(lifecycle.index().count(), 0);
        assert_eq!(a.lock().state(), TransferState::Cancelled);
        assert!(!lifecycle.has_failed(failed_id));
    }
}
