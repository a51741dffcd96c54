//! Asynchronous fetch-and-decode pipeline.
//!
//! Each admitted transfer gets one task on the runtime:
//!
//! ```text
//! AssetSource::lookup ──► AssetFetched ──► Decoder::decode ──► Decoded(image)
//!        │                                        │
//!        └──────────── Failed(error) ◄────────────┘
//! ```
//!
//! Tasks never touch transfers. Every outcome is posted as a [`Completion`]
//! message addressed by texture *and* serial; the owner of the priority index
//! applies them (see [`CompletionQueue`]). After shutdown, tasks stop at the
//! next await point and post nothing. A retired transfer aborts its task.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, Instrument};

use crate::error::{AssetError, TransferError};
use crate::source::{AssetSource, DecodedImage, Decoder};
use crate::transfer::{TextureId, TransferSerial};

/// What happened in the pipeline.
#[derive(Debug, Clone)]
pub enum CompletionEvent {
    /// Raw bytes arrived; decoding has started.
    AssetFetched,
    /// Decoding finished.
    Decoded(Arc<DecodedImage>),
    /// Fetch or decode failed.
    Failed(TransferError),
}

/// A pipeline outcome addressed to one transfer instance.
#[derive(Debug, Clone)]
pub struct Completion {
    pub texture: TextureId,
    pub serial: TransferSerial,
    pub event: CompletionEvent,
}

/// Receiving side of the completion channel.
///
/// The receiver sits behind an async mutex so a session can await the next
/// completion while ticks drain whatever is already queued.
pub struct CompletionQueue {
    rx: Mutex<mpsc::UnboundedReceiver<Completion>>,
}

impl CompletionQueue {
    /// Take every completion queued right now.
    ///
    /// Returns nothing if another task is currently awaiting [`recv`](Self::recv);
    /// that task applies what arrives.
    pub fn drain(&self) -> Vec<Completion> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Vec::new();
        };
        let mut completions = Vec::new();
        while let Ok(completion) = rx.try_recv() {
            completions.push(completion);
        }
        completions
    }

    /// Wait for the next completion.
    pub async fn recv(&self) -> Option<Completion> {
        self.rx.lock().await.recv().await
    }
}

/// Starts fetch/decode tasks and posts their outcomes.
#[derive(Clone)]
pub struct FetchPipeline {
    assets: Arc<dyn AssetSource>,
    decoder: Arc<dyn Decoder>,
    completions: mpsc::UnboundedSender<Completion>,
    runtime: Handle,
    shutdown: CancellationToken,
}

impl FetchPipeline {
    /// Create a pipeline spawning onto `runtime`, plus its completion queue.
    pub fn new(
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn Decoder>,
        runtime: Handle,
        shutdown: CancellationToken,
    ) -> (Self, CompletionQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            assets,
            decoder,
            completions: tx,
            runtime,
            shutdown,
        };
        (pipeline, CompletionQueue { rx: Mutex::new(rx) })
    }

    /// Fetch `source` and decode it on behalf of transfer `serial` of `texture`.
    ///
    /// `source` differs from `texture` when a fallback image is substituted.
    /// Returns immediately with a handle that aborts the task.
    pub fn start(
        &self,
        texture: TextureId,
        source: TextureId,
        serial: TransferSerial,
    ) -> AbortHandle {
        let pipeline = self.clone();
        let span = tracing::debug_span!("fetch", texture = %texture, serial = %serial);
        self.runtime
            .spawn(async move { pipeline.run(texture, source, serial).await }.instrument(span))
            .abort_handle()
    }

    async fn run(&self, texture: TextureId, source: TextureId, serial: TransferSerial) {
        let lookup = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            result = self.assets.lookup(source) => result,
        };

        let data = match lookup {
            Ok(Some(data)) => data,
            Ok(None) => {
                let error = TransferError::Fetch(AssetError::NotFound(source));
                self.post(texture, serial, CompletionEvent::Failed(error));
                return;
            }
            Err(e) => {
                self.post(texture, serial, CompletionEvent::Failed(e.into()));
                return;
            }
        };

        trace!(bytes = data.len(), "Asset fetched");
        self.post(texture, serial, CompletionEvent::AssetFetched);

        let decoded = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return,
            result = self.decoder.decode(source, data) => result,
        };

        let event = match decoded {
            Ok(image) => {
                debug!(
                    bytes = image.len(),
                    layers = image.layers().len(),
                    "Image decoded"
                );
                CompletionEvent::Decoded(Arc::new(image))
            }
            Err(e) => CompletionEvent::Failed(e.into()),
        };
        self.post(texture, serial, event);
    }

    fn post(&self, texture: TextureId, serial: TransferSerial, event: CompletionEvent) {
        if self.shutdown.is_cancelled() {
            trace!("Shut down, completion dropped");
            return;
        }
        let completion = Completion {
            texture,
            serial,
            event,
        };
        if self.completions.send(completion).is_err() {
            trace!("Completion queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::source::{BoxFuture, LayeredDecoder, MemoryAssetSource};
    use crate::transfer::{TextureRequest, Transfer};
    use bytes::Bytes;

    /// Source that never answers.
    struct PendingSource;

    impl AssetSource for PendingSource {
        fn lookup(&self, _id: TextureId) -> BoxFuture<'_, Result<Option<Bytes>, AssetError>> {
            Box::pin(futures::future::pending())
        }
    }

    /// Decoder that always rejects its input.
    struct RejectingDecoder;

    impl Decoder for RejectingDecoder {
        fn decode(
            &self,
            _id: TextureId,
            _data: Bytes,
        ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>> {
            Box::pin(async { Err(DecodeError::Malformed("bad codestream".to_string())) })
        }
    }

    fn serial() -> TransferSerial {
        Transfer::from_request(&TextureRequest::new(TextureId::random(), 1.0)).serial()
    }

    fn pipeline(
        assets: Arc<dyn AssetSource>,
        decoder: Arc<dyn Decoder>,
    ) -> (FetchPipeline, CompletionQueue, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (pipeline, queue) =
            FetchPipeline::new(assets, decoder, Handle::current(), shutdown.clone());
        (pipeline, queue, shutdown)
    }

    #[tokio::test]
    async fn test_fetch_then_decode() {
        let assets = Arc::new(MemoryAssetSource::new());
        let id = TextureId::random();
        assets.insert(id, Bytes::from(vec![7u8; 5000]));
        let (pipeline, queue, _shutdown) = pipeline(assets, Arc::new(LayeredDecoder::default()));

        let serial = serial();
        pipeline.start(id, id, serial);

        let first = queue.recv().await.unwrap();
        assert_eq!(first.texture, id);
        assert_eq!(first.serial, serial);
        assert!(matches!(first.event, CompletionEvent::AssetFetched));

        let second = queue.recv().await.unwrap();
        match second.event {
            CompletionEvent::Decoded(image) => assert_eq!(image.len(), 5000),
            other => panic!("expected decoded image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_asset_fails_with_source_id() {
        let (pipeline, queue, _shutdown) = pipeline(
            Arc::new(MemoryAssetSource::new()),
            Arc::new(LayeredDecoder::default()),
        );
        let texture = TextureId::random();
        let fallback = TextureId::random();

        pipeline.start(texture, fallback, serial());

        let completion = queue.recv().await.unwrap();
        assert_eq!(completion.texture, texture);
        match completion.event {
            CompletionEvent::Failed(TransferError::Fetch(AssetError::NotFound(id))) => {
                assert_eq!(id, fallback)
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_failure_posted() {
        let assets = Arc::new(MemoryAssetSource::new());
        let id = TextureId::random();
        assets.insert(id, Bytes::from_static(b"garbage"));
        let (pipeline, queue, _shutdown) = pipeline(assets, Arc::new(RejectingDecoder));

        pipeline.start(id, id, serial());

        assert!(matches!(
            queue.recv().await.unwrap().event,
            CompletionEvent::AssetFetched
        ));
        assert!(matches!(
            queue.recv().await.unwrap().event,
            CompletionEvent::Failed(TransferError::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_pending_fetch() {
        let (pipeline, queue, shutdown) =
            pipeline(Arc::new(PendingSource), Arc::new(LayeredDecoder::default()));

        pipeline.start(TextureId::random(), TextureId::random(), serial());
        shutdown.cancel();
        tokio::task::yield_now().await;

        assert!(queue.drain().is_empty());
    }

    #[tokio::test]
    async fn test_nothing_posted_after_shutdown() {
        let assets = Arc::new(MemoryAssetSource::new());
        let id = TextureId::random();
        assets.insert(id, Bytes::from(vec![1u8; 100]));
        let (pipeline, queue, shutdown) = pipeline(assets, Arc::new(LayeredDecoder::default()));

        shutdown.cancel();
        pipeline.start(id, id, serial());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(queue.drain().is_empty());
    }
}
