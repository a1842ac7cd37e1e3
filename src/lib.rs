//! # StreamStore - Append-Only Multi-Stream Message Store
//!
//! StreamStore keeps many independent, ordered streams of immutable messages
//! and one global log that orders every message across all streams. It
//! provides:
//!
//! - **Optimistic concurrency**: appends state the version they expect
//! - **Idempotent retries**: re-sending an already committed batch is a no-op
//! - **Paged reads**: per stream or across the whole log, in either direction
//! - **Change notifications**: a polling notifier that turns the read model
//!   into push-based "something changed" hints
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               ReadonlyStreamStore / StreamStore                 │
//! │      (append_to_stream, read_stream_*, read_all_*, head)        │
//! └───────────────┬─────────────────────────────┬───────────────────┘
//!                 │                             │
//!                 ▼                             ▼
//! ┌───────────────────────────┐   ┌─────────────────────────────────┐
//! │   InMemoryStreamStore     │   │        SqliteStreamStore        │
//! │  (mutex-guarded state)    │   │  writer thread + reader pool    │
//! └─────────────┬─────────────┘   └───────────────┬─────────────────┘
//!               │       ┌───────────────────┐     │
//!               └──────►│   Append Engine   │◄────┘
//!                       │ (via StreamLedger)│
//!                       └───────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ PollingNotifier: read_head_position, then read_all_forwards     │
//! │ in a loop, broadcasting NotificationInfo to subscribers         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Dense stream versions**: a stream's versions are 0, 1, 2, ... with no gaps
//! 2. **Global ordering**: positions strictly increase and are never reused
//! 3. **Atomic batches**: an append commits all of its messages or none
//! 4. **Unique ids**: a `MessageId` occurs at most once per stream
//! 5. **Memory lags disk**: cached counters advance only after a commit
//!
//! ## Module Organization
//!
//! - [`error`]: Error type for all failure modes
//! - [`types`]: Versions, positions, ids and messages
//! - [`filter`]: Stream-prefix and message-type filters for global reads
//! - [`append`]: The append engine and its backend primitive
//! - [`page`]: Read pages and continuations
//! - [`store`]: The async store contracts
//! - [`memory`]: In-memory backend
//! - [`schema`], [`storage`], [`reader`], [`sqlite`]: SQLite backend
//! - [`notifier`]: Polling change notifications
//! - [`config`]: Configuration and tracing setup

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for store operations.
pub mod error;

/// Domain types: stream ids, message ids, versions, positions and messages.
///
/// Uses the newtype pattern so a stream version can never be passed where a
/// global position is expected.
pub mod types;

/// Filters applied to global-log reads.
pub mod filter;

/// The append engine.
///
/// Decides, for one batch and one expected version, whether to commit, treat
/// the batch as an idempotent retry, or reject it. Backends only provide the
/// primitives of [`append::StreamLedger`].
pub mod append;

/// Read pages and their continuations.
pub mod page;

/// The async contracts every backend implements.
pub mod store;

/// In-process backend.
pub mod memory;

/// SQLite schema definitions and database initialization.
pub mod schema;

/// Synchronous single-writer SQLite storage.
pub mod storage;

/// Direct-SQL read operations and the pooled reader loop.
pub mod reader;

/// Async SQLite backend.
///
/// The main durable entry point is [`SqliteStreamStore`](sqlite::SqliteStreamStore).
pub mod sqlite;

/// Polling change notifications.
///
/// See [`notifier::PollingNotifier`] for the state machine and delivery rules.
pub mod notifier;

/// Configuration loading and tracing setup.
pub mod config;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{init_tracing, Config, NotifierConfig, StorageConfig};
pub use error::{Error, Result};
pub use filter::{AllStreamFilter, MessageTypeFilter, TypeFilterMode};
pub use memory::InMemoryStreamStore;
pub use notifier::{NotificationInfo, NotificationSubscription, NotifierState, PollingNotifier};
pub use page::{PageReadStatus, ReadAllPage, ReadAllRequest, ReadDirection, ReadStreamPage};
pub use schema::Database;
pub use sqlite::SqliteStreamStore;
pub use store::{ReadonlyStreamStore, StreamStore};

pub use types::{
    AppendResult, ExpectedVersion, MessageId, NewStreamMessage, Position, StreamHead, StreamId,
    StreamMessage, StreamVersion,
};

// Cancellation is part of every store signature.
pub use tokio_util::sync::CancellationToken;
