//! Texture request types.
//!
//! Provides the identifiers used throughout the streaming core and the
//! [`TextureRequest`] that a client sends to admit, update or cancel a
//! transfer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a requested image resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TextureId(Uuid);

impl TextureId {
    /// Wrap an existing UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TextureId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of the connected client (agent) a manager serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(Uuid);

impl AgentId {
    /// Wrap an existing UUID.
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generate a fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Discard level that, paired with zero priority, cancels a transfer.
pub const CANCEL_DISCARD_LEVEL: i8 = -1;

/// A client's request for a texture.
///
/// The same type carries admission, update and cancellation: a request with
/// `discard_level == -1` and `priority == 0.0` cancels the transfer for
/// `texture`, any other request admits it or updates it in place.
///
/// # Example
///
/// ```
/// use texstream::transfer::{TextureId, TextureRequest};
///
/// let texture = TextureId::random();
/// let request = TextureRequest::new(texture, 10.0).with_start_packet(-3);
/// assert_eq!(request.clamped_start_packet(), 1);
/// assert!(!request.is_cancellation());
///
/// assert!(TextureRequest::cancel(texture, 2).is_cancellation());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureRequest {
    /// Requested texture.
    pub texture: TextureId,
    /// Urgency; higher is served first.
    pub priority: f32,
    /// Requested resolution floor (0 = full resolution).
    pub discard_level: i8,
    /// First packet the client still needs, as sent by the client.
    pub start_packet: i32,
    /// Client request counter used to reject stale updates.
    pub sequence: u32,
}

impl TextureRequest {
    /// Create a full-resolution request starting at the first packet.
    pub fn new(texture: TextureId, priority: f32) -> Self {
        Self {
            texture,
            priority,
            discard_level: 0,
            start_packet: 1,
            sequence: 0,
        }
    }

    /// Create a cancellation for `texture`.
    pub fn cancel(texture: TextureId, sequence: u32) -> Self {
        Self {
            texture,
            priority: 0.0,
            discard_level: CANCEL_DISCARD_LEVEL,
            start_packet: 0,
            sequence,
        }
    }

    /// Set the requested discard level.
    pub fn with_discard_level(mut self, discard_level: i8) -> Self {
        self.discard_level = discard_level;
        self
    }

    /// Set the requested start packet.
    pub fn with_start_packet(mut self, start_packet: i32) -> Self {
        self.start_packet = start_packet;
        self
    }

    /// Set the request sequence number.
    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Whether this request is the cancellation sentinel.
    pub fn is_cancellation(&self) -> bool {
        self.discard_level == CANCEL_DISCARD_LEVEL && self.priority == 0.0
    }

    /// The start packet clamped to at least 1.
    pub fn clamped_start_packet(&self) -> u32 {
        self.start_packet.max(1) as u32
    }

    /// The priority with NaN mapped to zero so it can be totally ordered.
    pub fn effective_priority(&self) -> f32 {
        if self.priority.is_nan() {
            0.0
        } else {
            self.priority
        }
    }
}
