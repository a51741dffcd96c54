//! Per-texture transfer state.
//!
//! A [`Transfer`] tracks one texture requested by one client: the request
//! fields the client controls (priority, discard level, start packet,
//! sequence), progress through the fetch/decode pipeline, and the send
//! cursor the scheduler advances.
//!
//! Transfers are shared between the router, the completion applier and the
//! scheduler as [`SharedTransfer`] and always mutated under their own lock.

pub mod layout;
mod request;
mod state;

pub use layout::LayerBoundary;
pub use request::{AgentId, TextureId, TextureRequest, CANCEL_DISCARD_LEVEL};
pub use state::{Transfer, TransferInfo, TransferSerial, TransferState};

use std::sync::Arc;

use parking_lot::Mutex;

/// A transfer shared between the router, completion applier and scheduler.
pub type SharedTransfer = Arc<Mutex<Transfer>>;
