//! Layer-table decoder.

use bytes::Bytes;

use super::{BoxFuture, DecodedImage, Decoder};
use crate::error::DecodeError;
use crate::transfer::{LayerBoundary, TextureId};

/// Default number of quality layers.
pub const DEFAULT_LAYER_COUNT: usize = 5;

/// Decoder that derives quality layers from the byte length alone.
///
/// Each layer ends at twice the offset of the previous one, the last layer
/// at the end of the data: a 5-layer image of `n` bytes has layers ending at
/// `n/16, n/8, n/4, n/2, n`. This matches how progressive codecs grow their
/// layers and stands in for a real codec at the decode boundary.
#[derive(Debug, Clone, Copy)]
pub struct LayeredDecoder {
    layer_count: usize,
}

impl LayeredDecoder {
    pub fn new(layer_count: usize) -> Self {
        Self { layer_count }
    }

    pub fn layer_count(&self) -> usize {
        self.layer_count
    }

    /// Layer table for an image of `len` bytes.
    pub fn layers_for(&self, len: usize) -> Vec<LayerBoundary> {
        let mut layers = Vec::with_capacity(self.layer_count);
        let mut start = 0;
        for i in 0..self.layer_count {
            let shift = (self.layer_count - 1 - i).min(usize::BITS as usize - 1);
            let end = (len >> shift).max(start + 1).min(len);
            if end <= start {
                break;
            }
            layers.push(LayerBoundary::new(start, end));
            start = end;
        }
        layers
    }
}

impl Default for LayeredDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_LAYER_COUNT)
    }
}

impl Decoder for LayeredDecoder {
    fn decode(
        &self,
        _id: TextureId,
        data: Bytes,
    ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>> {
        Box::pin(async move {
            if data.is_empty() {
                return Err(DecodeError::Empty);
            }
            let layers = self.layers_for(data.len());
            Ok(DecodedImage::new(data, layers))
        })
    }
}
