//! # Domain Types for the Stream Store
//!
//! This module defines the core types used throughout the crate. These types
//! model the store's domain: streams, messages, versions, positions and the
//! optimistic-concurrency precondition on appends.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! We use the "newtype pattern" extensively - wrapping primitive types in
//! single-field structs. This provides:
//!
//! - **Type safety**: Can't accidentally pass a `Position` where a `StreamVersion` is expected
//! - **Self-documenting code**: Function signatures tell you what they expect
//! - **Encapsulation**: Sentinels live next to the type they belong to
//!
//! ## Numbering
//!
//! ```text
//! stream "order-1":   v0      v1              v2
//! stream "order-2":       v0       v1
//! global log:       p0  p1  p2   p3   p4     p5
//! ```
//!
//! - [`StreamVersion`]: zero-based, strictly increasing per stream, no gaps
//! - [`Position`]: zero-based, strictly increasing across every stream, never reused
//!
//! Both are `i64` because `-1` is a meaningful answer ("exists but empty").

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Stream Identification
// =============================================================================

/// A human-readable identifier for a stream.
///
/// Comparison is ordinal and case-sensitive: `"Order-1"` and `"order-1"` are
/// different streams.
///
/// # Example
///
/// ```rust
/// use streamstore::types::StreamId;
///
/// let stream = StreamId::new("order-12345");
/// assert_eq!(stream.as_str(), "order-12345");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a new stream ID from a string.
    ///
    /// Construction never fails; [`StreamId::validate`] is applied at the
    /// store boundary so that every backend rejects the same inputs.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this stream ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks that the id may be written to or read from.
    ///
    /// Rejects empty or whitespace-only ids, and ids starting with `$`
    /// (reserved for system streams).
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "stream id must not be empty or whitespace".to_string(),
            ));
        }
        if self.0.starts_with('$') {
            return Err(Error::InvalidArgument(format!(
                "stream id '{}' starts with '$', which is reserved",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&StreamId> for StreamId {
    fn from(s: &StreamId) -> Self {
        s.clone()
    }
}

// =============================================================================
// Message Identification (for Idempotency)
// =============================================================================

/// Caller-supplied unique identifier of a message.
///
/// The append engine compares these, position by position, to tell a retried
/// append apart from a real conflict. Callers must reuse the same id when they
/// retry; a fresh id means a fresh message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a random (v4) message id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the wrapped UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Returns the 16 raw bytes for database storage.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Rebuilds an id from database bytes. Returns `None` if the length is wrong.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        Uuid::from_slice(bytes).ok().map(Self)
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for MessageId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Versions and Positions
// =============================================================================

/// A version number within a stream.
///
/// # Invariants
///
/// - Zero-based: the first message of a stream is version 0
/// - Strictly increases within a stream, no gaps
/// - Assigned at commit time, never reused
///
/// # Rust Pattern: Distinct from Position
///
/// Even though both wrap `i64`, they're different types. This prevents
/// bugs like `read_stream(stream_id, position)` when you meant a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamVersion(i64);

impl StreamVersion {
    /// The first readable version (0).
    pub const START: StreamVersion = StreamVersion(0);

    /// "No message": the latest version of a stream that exists but is empty.
    pub const NONE: StreamVersion = StreamVersion(-1);

    /// "From the head": cursor for reading a stream backwards from its latest message.
    pub const END: StreamVersion = StreamVersion(i64::MAX);

    /// Creates a StreamVersion from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous version. `START.prev()` is `NONE`.
    pub fn prev(&self) -> Self {
        Self(self.0 - 1)
    }

    /// Adds an offset to this version.
    pub fn add(&self, count: i64) -> Self {
        Self(self.0 + count)
    }

    /// Returns true for the "no message" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == -1
    }
}

impl fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::END {
            write!(f, "end")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A position in the global, all-stream log.
///
/// # Invariants
///
/// - Zero-based, strictly increases with each committed message
/// - Messages of one append are contiguous
/// - Never reused, even for rejected appends
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(i64);

impl Position {
    /// The first position in the log (0).
    pub const START: Position = Position(0);

    /// "No message": head of an empty store, or tail of an empty stream.
    pub const NONE: Position = Position(-1);

    /// "From the head": cursor for reading the log backwards from its latest message.
    pub const END: Position = Position(i64::MAX);

    /// Creates a Position from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns the next position.
    pub fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns the previous position. `START.prev()` is `NONE`.
    pub fn prev(&self) -> Self {
        Self(self.0 - 1)
    }

    /// Returns true for the "no message" sentinel.
    pub fn is_none(&self) -> bool {
        self.0 == -1
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::END {
            write!(f, "end")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// =============================================================================
// Expected Version
// =============================================================================

/// The caller's optimistic-concurrency precondition for an append.
///
/// # Rust Pattern: Tagged Variants Instead of Magic Numbers
///
/// `NoStream` and `Any` are variants, not negative integers smuggled through a
/// version field, so a raw `-1` can never be mistaken for a precondition.
///
/// # Example
///
/// ```rust
/// use streamstore::types::{ExpectedVersion, StreamVersion};
///
/// let create = ExpectedVersion::NoStream;
/// let continue_from = ExpectedVersion::Exact(StreamVersion::from_raw(2));
/// assert_eq!(continue_from, ExpectedVersion::from(StreamVersion::from_raw(2)));
/// # let _ = create;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// No ordering requirement.
    Any,
    /// The stream must not exist yet (or must already hold exactly this batch).
    NoStream,
    /// The stream's latest version must be exactly this one.
    Exact(StreamVersion),
}

impl From<StreamVersion> for ExpectedVersion {
    fn from(version: StreamVersion) -> Self {
        ExpectedVersion::Exact(version)
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A message to be appended to a stream.
///
/// This is the "input" form. It doesn't have a version or position yet;
/// those are assigned at commit time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStreamMessage {
    /// Idempotency key.
    pub message_id: MessageId,

    /// Type discriminator, used by message type filters.
    pub message_type: String,

    /// Opaque payload. The store never looks inside it.
    pub data: Vec<u8>,

    /// Optional opaque metadata (correlation ids and the like).
    pub metadata: Option<Vec<u8>>,
}

impl NewStreamMessage {
    /// Creates a new message without metadata.
    pub fn new(
        message_id: impl Into<MessageId>,
        message_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            data: data.into(),
            metadata: None,
        }
    }

    /// Adds metadata to this message (builder pattern).
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

/// A committed message.
///
/// This is the "output" form - what you get when reading. Immutable once
/// committed; the store never rewrites or deletes it.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// The stream this message belongs to.
    pub stream_id: StreamId,

    /// Idempotency key supplied at append time.
    pub message_id: MessageId,

    /// Version within the stream.
    pub stream_version: StreamVersion,

    /// Position in the global log.
    pub position: Position,

    /// When the message was committed.
    pub created_at: DateTime<Utc>,

    /// Type discriminator.
    pub message_type: String,

    /// The payload, or `None` when read without prefetch.
    ///
    /// See [`StreamMessage::load_data`] for lazy loading.
    pub data: Option<Vec<u8>>,

    /// The metadata, if any was supplied.
    pub metadata: Option<Vec<u8>>,
}

// =============================================================================
// Stream Heads and Append Results
// =============================================================================

/// The latest version and position of an existing stream.
///
/// An empty stream (created by appending zero messages) has the head
/// `(StreamVersion::NONE, Position::NONE)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Version of the last message, or `NONE`.
    pub version: StreamVersion,
    /// Position of the last message, or `NONE`.
    pub position: Position,
}

impl StreamHead {
    /// Head of a stream that exists but holds no messages.
    pub const EMPTY: StreamHead = StreamHead {
        version: StreamVersion::NONE,
        position: Position::NONE,
    };

    /// Creates a head from its parts.
    pub fn new(version: StreamVersion, position: Position) -> Self {
        Self { version, position }
    }

    /// Number of messages in the stream.
    pub fn len(&self) -> usize {
        (self.version.as_raw() + 1) as usize
    }

    /// Returns true if the stream holds no messages.
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
    }
}

/// The result of a successful append.
///
/// # Invariant
///
/// `current_position` is the global position of the message at
/// `current_version`. Idempotent no-ops report the stream's existing tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    /// Version of the last message in the stream after the append.
    pub current_version: StreamVersion,

    /// Global position of that message.
    pub current_position: Position,
}

impl AppendResult {
    /// Creates a new append result.
    pub fn new(current_version: StreamVersion, current_position: Position) -> Self {
        Self {
            current_version,
            current_position,
        }
    }
}

impl From<StreamHead> for AppendResult {
    fn from(head: StreamHead) -> Self {
        Self::new(head.version, head.position)
    }
}

// =============================================================================
// Tests
// =============================================================================
