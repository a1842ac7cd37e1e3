//! # Error Handling for the Stream Store
//!
//! This module defines the error types used throughout the crate. We use a single
//! error enum ([`Error`]) to represent all possible failure modes, which simplifies
//! error handling for library users.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations.
//! This provides:
//! - Automatic `Display` implementation from the `#[error(...)]` attributes
//! - Automatic `From` implementations from the `#[from]` attributes
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Concurrency | Wrong expected version, diverging retry | Re-read the stream, decide, retry |
//! | Invalid input | Empty stream id, `max_count == 0` | Fix the caller |
//! | Backend | SQLite error, checksum mismatch | Surface to the caller, no implicit retry |
//! | Lifecycle | Cancelled, thread shut down | Stop issuing calls |

use thiserror::Error;

use crate::types::ExpectedVersion;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in stream store operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Concurrency Errors (Caller decides whether to retry)
    // =========================================================================

    /// The append precondition did not hold.
    ///
    /// # When This Happens
    ///
    /// - The stream's latest version differs from an `Exact` expected version
    /// - `NoStream` was given but the stream holds different messages
    /// - A retried batch diverges from what was already committed
    ///
    /// # Recovery
    ///
    /// 1. Re-read the stream to get current state
    /// 2. Re-apply business logic with new data
    /// 3. Retry the append with an updated expected version
    ///
    /// The store never retries this on its own: retrying could double-append.
    #[error("append failed due to wrong expected version. Stream: {stream_id}, Expected version: {expected}")]
    WrongExpectedVersion {
        /// The stream the append targeted.
        stream_id: String,
        /// The precondition supplied by the caller.
        expected: ExpectedVersion,
    },

    // =========================================================================
    // Invalid Input (Fail fast)
    // =========================================================================

    /// An argument was rejected before touching the backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Backend Errors (Surfaced to the caller)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// # Rust Pattern: #[from]
    ///
    /// The `#[from]` attribute generates `impl From<rusqlite::Error> for Error`,
    /// which lets `?` convert rusqlite errors automatically.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch, or stored rows that cannot be decoded.
    #[error("schema error: {0}")]
    Schema(String),

    /// A stored message failed its checksum.
    #[error("corrupted message at position {position}: checksum mismatch")]
    Corruption {
        /// Global position of the damaged message.
        position: i64,
    },

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// The operation observed a cancelled token before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// A notification subscriber fell behind and missed notifications.
    ///
    /// Notifications are hints, so the subscriber should re-read the store
    /// from its own checkpoint rather than treat this as fatal.
    #[error("subscription lagged: {0} notifications skipped")]
    SubscriptionLagged(u64),

    /// The store's background threads have stopped.
    ///
    /// Returned after `shutdown()` by every clone of the handle.
    #[error("store has shut down: {0}")]
    ShutDown(String),

    /// An internal failure: a poisoned lock or a thread that could not start.
    #[error("internal error: {0}")]
    Internal(String),

    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Shorthand used by the append engine when a precondition fails.
    pub(crate) fn wrong_expected_version(
        stream_id: impl Into<String>,
        expected: ExpectedVersion,
    ) -> Self {
        Error::WrongExpectedVersion {
            stream_id: stream_id.into(),
            expected,
        }
    }

    /// Returns true for optimistic concurrency failures.
    pub fn is_wrong_expected_version(&self) -> bool {
        matches!(self, Error::WrongExpectedVersion { .. })
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
