//! Asset source reading one file per asset from a directory.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::trace;

use super::{AssetSource, BoxFuture};
use crate::error::AssetError;
use crate::transfer::TextureId;

/// File extension of stored assets.
pub const ASSET_EXTENSION: &str = "j2c";

/// Reads `<root>/<uuid>.j2c` with `tokio::fs`.
#[derive(Debug, Clone)]
pub struct DirectoryAssetSource {
    root: PathBuf,
}

impl DirectoryAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an asset is stored at.
    pub fn path_for(&self, id: TextureId) -> PathBuf {
        self.root.join(format!("{}.{}", id, ASSET_EXTENSION))
    }
}

impl AssetSource for DirectoryAssetSource {
    fn lookup(&self, id: TextureId) -> BoxFuture<'_, Result<Option<Bytes>, AssetError>> {
        let path = self.path_for(id);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(data) => {
                    trace!(path = %path.display(), bytes = data.len(), "Asset read");
                    Ok(Some(Bytes::from(data)))
                }
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => Err(AssetError::Backend(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                ))),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_asset_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryAssetSource::new(dir.path());
        let id = TextureId::random();
        std::fs::write(source.path_for(id), b"j2k bytes").unwrap();

        let data = source.lookup(id).await.unwrap();
        assert_eq!(data, Some(Bytes::from_static(b"j2k bytes")));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryAssetSource::new(dir.path());

        assert_eq!(source.lookup(TextureId::random()).await, Ok(None));
    }

    #[tokio::test]
    async fn test_unreadable_path_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DirectoryAssetSource::new(dir.path());
        let id = TextureId::random();
        // A directory where the file should be
        std::fs::create_dir(source.path_for(id)).unwrap();

        assert!(matches!(
            source.lookup(id).await,
            Err(AssetError::Backend(_))
        ));
    }
}
