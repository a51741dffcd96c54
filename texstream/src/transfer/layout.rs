//! Packet addressing for decoded images.
//!
//! Image bytes are addressed in fixed-size packets:
//!
//! ```text
//! packet 0   ─ header: image metadata + the first FIRST_PACKET_SIZE bytes
//! packet 1.. ─ IMAGE_PACKET_SIZE bytes each, the last one holds the remainder
//! ```
//!
//! A discard level selects how many quality layers the client wants. The
//! packet holding the last byte of the selected layer is the *stop packet*;
//! once it has been sent the transfer is satisfied.

use std::ops::Range;

/// Bytes carried by the header packet.
pub const FIRST_PACKET_SIZE: usize = 600;

/// Bytes carried by every data packet except possibly the last.
pub const IMAGE_PACKET_SIZE: usize = 1000;

/// Byte range of one quality layer within the encoded image.
///
/// `end` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerBoundary {
    pub start: usize,
    pub end: usize,
}

impl LayerBoundary {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Total number of packets needed for an image of `len` bytes, header included.
pub fn packet_count(len: usize) -> u32 {
    if len <= FIRST_PACKET_SIZE {
        1
    } else {
        1 + (len - FIRST_PACKET_SIZE).div_ceil(IMAGE_PACKET_SIZE) as u32
    }
}

/// Image size as carried in the header packet, if it fits.
pub fn image_size(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

/// Packet that carries the byte at `pos`.
pub fn packet_for_byte(pos: usize) -> u32 {
    if pos < FIRST_PACKET_SIZE {
        0
    } else {
        1 + ((pos - FIRST_PACKET_SIZE) / IMAGE_PACKET_SIZE) as u32
    }
}

/// Byte range carried by `packet` in an image of `len` bytes.
///
/// Packets past the end of the image yield an empty range.
pub fn packet_range(packet: u32, len: usize) -> Range<usize> {
    let (start, size) = if packet == 0 {
        (0, FIRST_PACKET_SIZE)
    } else {
        (
            FIRST_PACKET_SIZE + (packet as usize - 1) * IMAGE_PACKET_SIZE,
            IMAGE_PACKET_SIZE,
        )
    };
    let start = start.min(len);
    start..(start + size).min(len)
}

/// Coarsest discard level an image with `layers` quality layers supports.
pub fn max_discard_level(layers: &[LayerBoundary]) -> i8 {
    layers.len().saturating_sub(1).min(i8::MAX as usize) as i8
}

/// Last packet that must be sent to satisfy `discard_level`.
///
/// The level is clamped to the layers available; an image without layer
/// information is always sent in full. When the selected layer ends one
/// packet short of the image, the trailing packet is included as well.
pub fn stop_packet(layers: &[LayerBoundary], discard_level: i8, len: usize) -> u32 {
    let last = packet_count(len) - 1;
    if layers.is_empty() {
        return last;
    }

    let level = discard_level.clamp(0, max_discard_level(layers)) as usize;
    let layer = layers[layers.len() - 1 - level];
    let stop = packet_for_byte(layer.end.saturating_sub(1)).min(last);

    if stop + 1 == last {
        last
    } else {
        stop
    }
}
