//! texstream - Progressive texture streaming for virtual-world clients
//!
//! This library is the per-client core between "a client wants texture X at
//! priority P" and "N packets of X went out this tick": request admission
//! with sequence-based staleness rejection, a mutable-priority index of live
//! transfers, an asynchronous fetch-and-decode pipeline, and a scheduler that
//! paces packets against a fixed per-tick budget.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use texstream::{
//!     AgentId, ImageManager, LayeredDecoder, MemoryAssetSource, RecordingSink, StreamConfig,
//!     SubmitOutcome, TextureId, TextureRequest,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let texture = TextureId::random();
//! let assets = Arc::new(MemoryAssetSource::new());
//! assets.insert(texture, Bytes::from(vec![0u8; 2600]));
//! let sink = Arc::new(RecordingSink::new());
//!
//! let manager = ImageManager::new(
//!     AgentId::random(),
//!     StreamConfig::default(),
//!     assets,
//!     Arc::new(LayeredDecoder::default()),
//!     sink.clone(),
//!     tokio::runtime::Handle::current(),
//! );
//!
//! assert_eq!(manager.submit(&TextureRequest::new(texture, 1.0)), SubmitOutcome::Admitted);
//! while manager.transfer_info(texture).is_some_and(|t| t.state.is_pending()) {
//!     manager.process_next_completion().await;
//! }
//!
//! assert!(!manager.run_tick());
//! assert_eq!(sink.len(), 3);
//! # }
//! ```

pub mod config;
pub mod error;
mod lifecycle;
pub mod logging;
pub mod manager;
pub mod pipeline;
pub mod queue;
mod router;
mod scheduler;
pub mod session;
pub mod source;
pub mod telemetry;
pub mod transfer;
pub mod transport;

pub use config::{ConfigError, ConfigFile, FallbackPolicy, LoggingConfig, StreamConfig};
pub use error::{AssetError, DecodeError, TransferError};
pub use manager::ImageManager;
pub use router::SubmitOutcome;
pub use session::ClientSession;
pub use source::{
    AssetSource, DecodedImage, Decoder, DirectoryAssetSource, LayeredDecoder, MemoryAssetSource,
};
pub use telemetry::{StreamMetrics, StreamSnapshot};
pub use transfer::{AgentId, TextureId, TextureRequest, TransferInfo, TransferState};
pub use transport::{ChannelSink, ImagePacket, PacketSink, RecordingSink};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
