//! Error types for the fetch/decode pipeline.
//!
//! None of these escape `submit` or `run_tick`: a failed fetch or decode is
//! terminal for one transfer only and is logged where it is applied.

use std::time::Duration;

use thiserror::Error;

use crate::transfer::TextureId;

/// Errors reported by an asset source.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    /// The source has no asset with this id.
    #[error("Asset {0} not found")]
    NotFound(TextureId),

    /// The storage backend failed.
    #[error("Asset backend error: {0}")]
    Backend(String),
}

/// Errors reported by a decoder.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The asset bytes are not a decodable image.
    #[error("Malformed image data: {0}")]
    Malformed(String),

    /// The image has no data at all.
    #[error("Image is empty")]
    Empty,
}

/// Why a transfer failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// The asset could not be fetched.
    #[error("Fetch failed: {0}")]
    Fetch(#[from] AssetError),

    /// The asset could not be decoded.
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// The transfer waited on the pipeline longer than the stall timeout.
    #[error("Stalled for {waited:?} (timeout {timeout:?})")]
    Stalled { waited: Duration, timeout: Duration },
}
