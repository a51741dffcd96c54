//! Asset lookup and decode collaborators.
//!
//! The streaming core only depends on two asynchronous contracts:
//!
//! - [`AssetSource`]: raw image bytes by [`TextureId`]
//! - [`Decoder`]: raw bytes into a [`DecodedImage`] whose quality layers map
//!   onto packets
//!
//! Both use `Pin<Box<dyn Future>>` so they can be held as trait objects
//! (`Arc<dyn AssetSource>`), and both are only ever awaited on pipeline worker
//! tasks, never on the submit or tick path.
//!
//! # Available Implementations
//!
//! - [`MemoryAssetSource`] - assets held in a concurrent map
//! - [`DirectoryAssetSource`] - one `<uuid>.j2c` file per asset
//! - [`LayeredDecoder`] - splits raw bytes into geometric quality layers

mod decoder;
mod directory;
mod memory;

pub use decoder::LayeredDecoder;
pub use directory::DirectoryAssetSource;
pub use memory::MemoryAssetSource;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;

use crate::error::{AssetError, DecodeError};
use crate::transfer::layout::{self, LayerBoundary};
use crate::transfer::TextureId;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Lookup of raw image bytes.
pub trait AssetSource: Send + Sync {
    /// Fetch the raw bytes for `id`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the asset exists
    /// - `Ok(None)` if it does not
    /// - `Err(_)` if the backend failed
    fn lookup(&self, id: TextureId) -> BoxFuture<'_, Result<Option<Bytes>, AssetError>>;
}

/// Asynchronous image decoder.
pub trait Decoder: Send + Sync {
    /// Decode `data` into a packet-addressable image.
    fn decode(
        &self,
        id: TextureId,
        data: Bytes,
    ) -> BoxFuture<'_, Result<DecodedImage, DecodeError>>;
}

/// An image whose byte layout and quality layers are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    data: Bytes,
    layers: Vec<LayerBoundary>,
}

impl DecodedImage {
    pub fn new(data: Bytes, layers: Vec<LayerBoundary>) -> Self {
        Self { data, layers }
    }

    /// Encoded size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Quality layers, coarsest first.
    pub fn layers(&self) -> &[LayerBoundary] {
        &self.layers
    }

    /// Total packets, header included.
    pub fn packet_count(&self) -> u32 {
        layout::packet_count(self.data.len())
    }

    /// Bytes carried by `packet`; cheap, shares the underlying buffer.
    pub fn packet(&self, packet: u32) -> Bytes {
        self.data
            .slice(layout::packet_range(packet, self.data.len()))
    }
}
