//! Outgoing packet seam.
//!
//! The streaming core hands each packet to a [`PacketSink`] and moves on:
//! sending is fire-and-forget, framing and delivery belong to the transport.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::transfer::{AgentId, TextureId};

/// Metadata packet that opens a texture transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHeader {
    pub texture: TextureId,
    /// Encoded image size in bytes.
    pub total_size: u32,
    /// Total packets, header included.
    pub packet_count: u32,
    /// The first bytes of the image.
    pub data: Bytes,
}

/// One unit of outgoing image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePacket {
    /// Packet 0: metadata and the first bytes.
    Header(ImageHeader),
    /// Packet 1 and up.
    Data {
        texture: TextureId,
        packet: u32,
        data: Bytes,
    },
    /// The texture could not be delivered and no fallback exists.
    NotFound { texture: TextureId },
}

impl ImagePacket {
    pub fn texture(&self) -> TextureId {
        match self {
            ImagePacket::Header(header) => header.texture,
            ImagePacket::Data { texture, .. } | ImagePacket::NotFound { texture } => *texture,
        }
    }

    /// Packet index for data packets, `None` otherwise.
    pub fn packet_number(&self) -> Option<u32> {
        match self {
            ImagePacket::Data { packet, .. } => Some(*packet),
            _ => None,
        }
    }
}

/// Destination for outgoing packets.
///
/// Implementations must not block: `send` is called from the tick path.
pub trait PacketSink: Send + Sync {
    fn send(&self, agent: AgentId, packet: ImagePacket);
}

/// Forwards packets into an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(AgentId, ImagePacket)>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the transport drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(AgentId, ImagePacket)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PacketSink for ChannelSink {
    fn send(&self, agent: AgentId, packet: ImagePacket) {
        if self.tx.send((agent, packet)).is_err() {
            trace!(agent = %agent, "Transport receiver dropped, packet discarded");
        }
    }
}

/// Keeps every packet in memory, in send order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    packets: Mutex<Vec<ImagePacket>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every packet sent so far.
    pub fn packets(&self) -> Vec<ImagePacket> {
        self.packets.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.packets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.lock().is_empty()
    }

    /// Packets sent for one texture.
    pub fn packets_for(&self, texture: TextureId) -> Vec<ImagePacket> {
        self.packets
            .lock()
            .iter()
            .filter(|packet| packet.texture() == texture)
            .cloned()
            .collect()
    }
}

impl PacketSink for RecordingSink {
    fn send(&self, _agent: AgentId, packet: ImagePacket) {
        self.packets.lock().push(packet);
    }
}
