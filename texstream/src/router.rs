//! Request admission, update and cancellation.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::lifecycle::TransferLifecycle;
use crate::pipeline::FetchPipeline;
use crate::queue::IndexError;
use crate::transfer::{SharedTransfer, TextureId, TextureRequest, Transfer, TransferState};

/// What `submit` did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new transfer was created and its fetch started.
    Admitted,
    /// An existing transfer took the request's fields.
    Updated,
    /// The request's sequence was not newer than the transfer's.
    Stale,
    /// The transfer was cancelled and removed.
    Cancelled,
    /// Cancellation of a texture with no live transfer.
    Ignored,
    /// The manager is shut down.
    ShutDown,
}

impl SubmitOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmitOutcome::Admitted => "admitted",
            SubmitOutcome::Updated => "updated",
            SubmitOutcome::Stale => "stale",
            SubmitOutcome::Cancelled => "cancelled",
            SubmitOutcome::Ignored => "ignored",
            SubmitOutcome::ShutDown => "shut down",
        }
    }
}

impl fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Applies client requests to the priority index.
///
/// `submit` never blocks on I/O: admission only spawns the fetch task.
pub(crate) struct RequestRouter {
    lifecycle: Arc<TransferLifecycle>,
    pipeline: FetchPipeline,
}

impl RequestRouter {
    pub(crate) fn new(lifecycle: Arc<TransferLifecycle>, pipeline: FetchPipeline) -> Self {
        Self {
            lifecycle,
            pipeline,
        }
    }

    pub(crate) fn submit(&self, request: &TextureRequest) -> SubmitOutcome {
        if self.lifecycle.is_shut_down() {
            return SubmitOutcome::ShutDown;
        }

        if request.is_cancellation() {
            return self.cancel(request.texture);
        }

        // A concurrent removal can retire the transfer between lookup and
        // lock; admission then starts over on a fresh instance.
        loop {
            let outcome = match self.lifecycle.index().find_by_key(&request.texture) {
                Some(shared) => self.update(&shared, request),
                None => self.admit(request),
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
        }
    }

    fn cancel(&self, texture: TextureId) -> SubmitOutcome {
        let Some(shared) = self.lifecycle.index().find_by_key(&texture) else {
            trace!(texture = %texture, "Cancel for unknown texture ignored");
            return SubmitOutcome::Ignored;
        };

        let mut transfer = shared.lock();
        if transfer.state().is_terminal() {
            return SubmitOutcome::Ignored;
        }
        self.lifecycle.cancel(&mut transfer);
        SubmitOutcome::Cancelled
    }

    /// Update a live transfer in place. `None` if it was retired meanwhile.
    fn update(&self, shared: &SharedTransfer, request: &TextureRequest) -> Option<SubmitOutcome> {
        let mut transfer = shared.lock();
        if transfer.state().is_terminal() {
            return None;
        }

        if !transfer.apply_update(request) {
            trace!(
                texture = %request.texture,
                sequence = request.sequence,
                last_sequence = transfer.last_sequence(),
                "Stale request ignored"
            );
            self.lifecycle.metrics().request_stale();
            return Some(SubmitOutcome::Stale);
        }

        if let Some(handle) = transfer.handle() {
            match self.lifecycle.index().update_key(
                handle,
                request.texture,
                shared.clone(),
                transfer.priority(),
            ) {
                Ok(handle) => transfer.set_handle(handle),
                Err(e) => {
                    warn!(texture = %request.texture, error = %e, "Failed to reposition transfer")
                }
            }
        }

        self.lifecycle.metrics().request_updated();
        trace!(
            texture = %request.texture,
            priority = transfer.priority(),
            sequence = request.sequence,
            "Transfer updated"
        );
        Some(SubmitOutcome::Updated)
    }

    /// Create a transfer and start its fetch. `None` if another submit
    /// admitted the same texture first.
    fn admit(&self, request: &TextureRequest) -> Option<SubmitOutcome> {
        let transfer = Transfer::from_request(request);
        let serial = transfer.serial();
        let priority = transfer.priority();
        let shared: SharedTransfer = Arc::new(Mutex::new(transfer));

        // Hold the new transfer's lock until its handle is recorded.
        let mut guard = shared.lock();
        match self
            .lifecycle
            .index()
            .insert(request.texture, shared.clone(), priority)
        {
            Ok(handle) => guard.set_handle(handle),
            Err(IndexError::DuplicateKey) => return None,
            Err(e) => {
                warn!(texture = %request.texture, error = %e, "Failed to admit transfer");
                return None;
            }
        }

        // Shutdown may have torn the index down between the check in
        // `submit` and the insert above.
        if self.lifecycle.is_shut_down() {
            if let Some(handle) = guard.retire(TransferState::Cancelled) {
                self.lifecycle.index().delete(handle);
            }
            return Some(SubmitOutcome::ShutDown);
        }

        // Still under the lock, so a concurrent cancel sees the fetch.
        let source = self.lifecycle.source_for(request.texture);
        let fetch = self.pipeline.start(request.texture, source, serial);
        guard.set_fetch(fetch);
        drop(guard);

        self.lifecycle.metrics().request_admitted();
        debug!(
            texture = %request.texture,
            agent = %self.lifecycle.agent(),
            priority,
            discard_level = request.discard_level,
            sequence = request.sequence,
            "Transfer admitted"
        );
        Some(SubmitOutcome::Admitted)
    }
}
