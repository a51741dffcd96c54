//! Per-texture transfer state machine.
//!
//! ```text
//! AwaitingAsset ──fetched──► Decoding ──decoded──► Decoded ──sent──► Complete
//!       │                        │                    │
//!       └──── error ─────────────┴──► Failed          │
//!       └──── cancel ────────────┴────────────────────┴──► Cancelled
//! ```
//!
//! Field ownership: the router writes priority, discard level, start packet
//! and sequence; the completion applier writes the state and decoded image;
//! the scheduler writes the send cursor. All writes happen under the
//! transfer's own lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

use super::layout;
use super::request::{AgentId, TextureId, TextureRequest};
use crate::error::DecodeError;
use crate::queue::QueueHandle;
use crate::source::DecodedImage;
use crate::transport::{ImageHeader, ImagePacket, PacketSink};

static SERIAL_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of one transfer instance.
///
/// A texture that is cancelled and requested again gets a new serial, so
/// completions addressed to the old instance can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferSerial(u64);

impl TransferSerial {
    fn next() -> Self {
        Self(SERIAL_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TransferSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TransferState {
    /// Waiting for the asset source lookup.
    AwaitingAsset,
    /// Raw bytes fetched, decode in progress.
    Decoding,
    /// Layout known; packets can be sent.
    Decoded,
    /// Every packet for the requested discard level was sent.
    Complete,
    /// Cancelled by the client.
    Cancelled,
    /// Fetch or decode failed.
    Failed,
}

impl TransferState {
    /// Get a short description for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::AwaitingAsset => "AwaitingAsset",
            TransferState::Decoding => "Decoding",
            TransferState::Decoded => "Decoded",
            TransferState::Complete => "Complete",
            TransferState::Cancelled => "Cancelled",
            TransferState::Failed => "Failed",
        }
    }

    /// Whether the transfer has left the priority index for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Complete | TransferState::Cancelled | TransferState::Failed
        )
    }

    /// Whether the transfer is still waiting on the fetch/decode pipeline.
    pub fn is_pending(&self) -> bool {
        matches!(self, TransferState::AwaitingAsset | TransferState::Decoding)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of a transfer's observable fields.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TransferInfo {
    pub texture: TextureId,
    pub priority: f32,
    pub discard_level: i8,
    pub start_packet: u32,
    pub last_sequence: u32,
    pub state: TransferState,
    pub send_cursor: u32,
    pub stop_packet: Option<u32>,
    pub header_sent: bool,
}

/// A texture being delivered to one client.
pub struct Transfer {
    texture: TextureId,
    serial: TransferSerial,
    priority: f32,
    discard_level: i8,
    start_packet: u32,
    last_sequence: u32,
    state: TransferState,
    image: Option<Arc<DecodedImage>>,
    total_size: u32,
    send_cursor: u32,
    stop_packet: Option<u32>,
    header_sent: bool,
    handle: Option<QueueHandle>,
    fetch: Option<AbortHandle>,
    admitted_at: Instant,
}

impl Transfer {
    /// Create a transfer from the request that admitted it.
    pub fn from_request(request: &TextureRequest) -> Self {
        let start_packet = request.clamped_start_packet();
        Self {
            texture: request.texture,
            serial: TransferSerial::next(),
            priority: request.effective_priority(),
            discard_level: request.discard_level,
            start_packet,
            last_sequence: request.sequence,
            state: TransferState::AwaitingAsset,
            image: None,
            total_size: 0,
            send_cursor: start_packet,
            stop_packet: None,
            header_sent: false,
            handle: None,
            fetch: None,
            admitted_at: Instant::now(),
        }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn serial(&self) -> TransferSerial {
        self.serial
    }

    pub fn priority(&self) -> f32 {
        self.priority
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    pub fn send_cursor(&self) -> u32 {
        self.send_cursor
    }

    pub fn handle(&self) -> Option<QueueHandle> {
        self.handle
    }

    pub(crate) fn set_handle(&mut self, handle: QueueHandle) {
        self.handle = Some(handle);
    }

    /// Attach the fetch task working for this transfer.
    pub(crate) fn set_fetch(&mut self, fetch: AbortHandle) {
        self.fetch = Some(fetch);
    }

    /// Whether packets can be sent.
    pub fn is_ready(&self) -> bool {
        self.state == TransferState::Decoded
    }

    /// How long the transfer has existed.
    pub fn age(&self) -> Duration {
        self.admitted_at.elapsed()
    }

    /// Apply a newer request in place.
    ///
    /// Returns `false` without touching anything when `request.sequence` is
    /// not newer than the last accepted one. The send cursor only moves
    /// forward: packets the client already has are never resent.
    pub fn apply_update(&mut self, request: &TextureRequest) -> bool {
        if request.sequence <= self.last_sequence {
            return false;
        }

        self.last_sequence = request.sequence;
        self.discard_level = request.discard_level;
        self.start_packet = request.clamped_start_packet();
        self.send_cursor = self.send_cursor.max(self.start_packet);
        self.priority = request.effective_priority();
        self.refresh_stop_packet();
        true
    }

    /// Record that the raw asset arrived and decoding started.
    pub fn mark_decoding(&mut self) -> bool {
        if self.state != TransferState::AwaitingAsset {
            return false;
        }
        self.state = TransferState::Decoding;
        true
    }

    /// Record the decoded layout; the transfer becomes sendable.
    ///
    /// Returns `Ok(false)` when the transfer is no longer pending. An image
    /// too large for the header's size field is rejected.
    pub fn mark_decoded(&mut self, image: Arc<DecodedImage>) -> Result<bool, DecodeError> {
        if !self.state.is_pending() {
            return Ok(false);
        }
        self.total_size = layout::image_size(image.len()).ok_or_else(|| {
            DecodeError::Malformed(format!("image of {} bytes is too large", image.len()))
        })?;
        self.image = Some(image);
        self.state = TransferState::Decoded;
        self.refresh_stop_packet();
        Ok(true)
    }

    /// Move into a terminal state, returning the queue handle to release.
    ///
    /// A fetch still running for this transfer is aborted.
    pub(crate) fn retire(&mut self, state: TransferState) -> Option<QueueHandle> {
        debug_assert!(state.is_terminal());
        self.state = state;
        if let Some(fetch) = self.fetch.take() {
            fetch.abort();
        }
        self.handle.take()
    }

    /// Recompute the stop packet for the current discard level.
    ///
    /// A negative level keeps an already computed stop packet and otherwise
    /// selects the coarsest level the image offers.
    fn refresh_stop_packet(&mut self) {
        let Some(image) = &self.image else {
            return;
        };

        if self.discard_level >= 0 || self.stop_packet.is_none() {
            let level = if self.discard_level < 0 {
                layout::max_discard_level(image.layers())
            } else {
                self.discard_level
            };
            self.stop_packet = Some(layout::stop_packet(image.layers(), level, image.len()));
        }
    }

    /// Whether every packet for the current discard level has been sent.
    pub fn is_done(&self) -> bool {
        match self.stop_packet {
            Some(stop) => self.header_sent && self.send_cursor > stop,
            None => false,
        }
    }

    /// Emit up to `max_count` packets starting at the send cursor.
    ///
    /// The header packet goes out first, once. Returns the number of packets
    /// sent and whether the transfer is now satisfied.
    pub fn send_packets(
        &mut self,
        sink: &dyn PacketSink,
        agent: AgentId,
        max_count: u32,
    ) -> (u32, bool) {
        let (Some(image), Some(stop)) = (self.image.clone(), self.stop_packet) else {
            return (0, false);
        };

        let mut sent = 0;
        if !self.header_sent && sent < max_count {
            sink.send(
                agent,
                ImagePacket::Header(ImageHeader {
                    texture: self.texture,
                    total_size: self.total_size,
                    packet_count: layout::packet_count(image.len()),
                    data: image.packet(0),
                }),
            );
            self.header_sent = true;
            sent += 1;
        }

        while sent < max_count && self.send_cursor <= stop {
            sink.send(
                agent,
                ImagePacket::Data {
                    texture: self.texture,
                    packet: self.send_cursor,
                    data: image.packet(self.send_cursor),
                },
            );
            self.send_cursor += 1;
            sent += 1;
        }

        (sent, self.is_done())
    }

    pub fn info(&self) -> TransferInfo {
        TransferInfo {
            texture: self.texture,
            priority: self.priority,
            discard_level: self.discard_level,
            start_packet: self.start_packet,
            last_sequence: self.last_sequence,
            state: self.state,
            send_cursor: self.send_cursor,
            stop_packet: self.stop_packet,
            header_sent: self.header_sent,
        }
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("texture", &self.texture)
            .field("serial", &self.serial)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("send_cursor", &self.send_cursor)
            .field("stop_packet", &self.stop_packet)
            .finish_non_exhaustive()
    }
}
