//! In-memory asset source.

use bytes::Bytes;
use dashmap::DashMap;

use super::{AssetSource, BoxFuture};
use crate::error::AssetError;
use crate::transfer::TextureId;

/// Asset source backed by a concurrent map.
///
/// Lookups resolve immediately. Used for generated assets and tests.
#[derive(Debug, Default)]
pub struct MemoryAssetSource {
    assets: DashMap<TextureId, Bytes>,
}

impl MemoryAssetSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) an asset.
    pub fn insert(&self, id: TextureId, data: impl Into<Bytes>) {
        self.assets.insert(id, data.into());
    }

    pub fn remove(&self, id: &TextureId) -> bool {
        self.assets.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl AssetSource for MemoryAssetSource {
    fn lookup(&self, id: TextureId) -> BoxFuture<'_, Result<Option<Bytes>, AssetError>> {
        let found = self.assets.get(&id).map(|entry| entry.value().clone());
        Box::pin(async move { Ok(found) })
    }
}
