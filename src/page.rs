//! # Paged Read Model
//!
//! Reads come back as bounded pages. Every page carries the cursor it was read
//! from, the cursor to resume from, and an `is_end` flag, so a caller (or the
//! notifier) can walk a stream or the global log without re-scanning from the
//! origin.
//!
//! ## Fetch One Extra
//!
//! Backends fetch `max_count + 1` rows. The extra row is never returned; its
//! presence is how a page knows it is not the end.
//!
//! ```text
//! forward, max_count = 3, from = 2
//!
//! stored:   v0 v1 [v2 v3 v4] v5      fetched v2..v5 (4 rows)
//!                  └─ page ─┘        is_end = false, next = 5
//! ```
//!
//! ## Cursor Rules
//!
//! | Read | Next cursor | Empty page |
//! |------|-------------|------------|
//! | stream forward | last version + 1 | `max(from, head + 1)` |
//! | stream backward | last version - 1 | `-1` |
//! | all forward | last position + 1 | `from` (retry the same cursor) |
//! | all backward | last position - 1 | `-1` |
//!
//! All-stream filters are applied *after* the cursor is computed from the raw
//! rows: filtered-out messages still consume their slot but never reappear.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::filter::{satisfies, AllStreamFilter};
use crate::store::ReadonlyStreamStore;
use crate::types::{Position, StreamHead, StreamId, StreamMessage, StreamVersion};

// =============================================================================
// Direction and Status
// =============================================================================

/// Which way a page walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    /// Ascending versions or positions.
    Forward,
    /// Descending versions or positions.
    Backward,
}

/// Outcome of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReadStatus {
    /// The stream exists (it may still be empty).
    Success,
    /// The stream has never been created.
    StreamNotFound,
}

/// Number of rows a backend should fetch for a page of `max_count`.
pub(crate) fn fetch_limit(max_count: usize) -> i64 {
    max_count.saturating_add(1).min(i64::MAX as usize) as i64
}

pub(crate) fn validate_stream_read(
    stream_id: &StreamId,
    from_version: StreamVersion,
    max_count: usize,
    direction: ReadDirection,
) -> Result<()> {
    stream_id.validate()?;
    validate_max_count(max_count)?;
    if direction == ReadDirection::Forward && from_version < StreamVersion::START {
        return Err(Error::InvalidArgument(format!(
            "forward stream reads must start at version 0 or later, got {}",
            from_version
        )));
    }
    Ok(())
}

pub(crate) fn validate_all_read(
    from_position: Position,
    max_count: usize,
    direction: ReadDirection,
) -> Result<()> {
    validate_max_count(max_count)?;
    if direction == ReadDirection::Forward && from_position < Position::START {
        return Err(Error::InvalidArgument(format!(
            "forward reads of the all stream must start at position 0 or later, got {}",
            from_position
        )));
    }
    Ok(())
}

fn validate_max_count(max_count: usize) -> Result<()> {
    if max_count == 0 {
        return Err(Error::InvalidArgument(
            "max_count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

// =============================================================================
// Stream Pages
// =============================================================================

/// A page of messages from one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadStreamPage {
    /// The stream that was read.
    pub stream_id: StreamId,
    /// Whether the stream exists.
    pub status: PageReadStatus,
    /// The cursor this page was read from.
    pub from_version: StreamVersion,
    /// The cursor to resume from.
    pub next_version: StreamVersion,
    /// Latest version of the stream at read time (`-1` if empty or missing).
    pub last_stream_version: StreamVersion,
    /// Position of that latest message (`-1` if empty or missing).
    pub last_stream_position: Position,
    /// Which way this page walked.
    pub direction: ReadDirection,
    /// True when no further messages exist beyond this page at read time.
    pub is_end: bool,
    /// Page size the read was issued with, reused by [`read_next`](Self::read_next).
    pub max_count: usize,
    /// The messages, in `direction` order.
    pub messages: Vec<StreamMessage>,
}

impl ReadStreamPage {
    /// Page for a stream that has never been created.
    pub(crate) fn not_found(
        stream_id: StreamId,
        from_version: StreamVersion,
        direction: ReadDirection,
        max_count: usize,
    ) -> Self {
        Self {
            stream_id,
            status: PageReadStatus::StreamNotFound,
            from_version,
            next_version: StreamVersion::NONE,
            last_stream_version: StreamVersion::NONE,
            last_stream_position: Position::NONE,
            direction,
            is_end: true,
            max_count,
            messages: Vec::new(),
        }
    }

    /// Builds a page from up to `max_count + 1` fetched rows.
    pub(crate) fn from_fetch(
        stream_id: StreamId,
        head: StreamHead,
        from_version: StreamVersion,
        direction: ReadDirection,
        max_count: usize,
        mut fetched: Vec<StreamMessage>,
    ) -> Self {
        let is_end = fetched.len() <= max_count;
        fetched.truncate(max_count);

        let next_version = match (direction, fetched.last()) {
            (ReadDirection::Forward, Some(last)) => last.stream_version.next(),
            (ReadDirection::Forward, None) => from_version.max(head.version.next()),
            (ReadDirection::Backward, Some(last)) => last.stream_version.prev(),
            (ReadDirection::Backward, None) => StreamVersion::NONE,
        };

        Self {
            stream_id,
            status: PageReadStatus::Success,
            from_version,
            next_version,
            last_stream_version: head.version,
            last_stream_position: head.position,
            direction,
            is_end,
            max_count,
            messages: fetched,
        }
    }

    /// Re-issues the read from this page's `next_version`.
    pub async fn read_next<S>(&self, store: &S, cancel: &CancellationToken) -> Result<ReadStreamPage>
    where
        S: ReadonlyStreamStore + ?Sized,
    {
        match self.direction {
            ReadDirection::Forward => {
                store
                    .read_stream_forwards(&self.stream_id, self.next_version, self.max_count, cancel)
                    .await
            }
            ReadDirection::Backward => {
                store
                    .read_stream_backwards(&self.stream_id, self.next_version, self.max_count, cancel)
                    .await
            }
        }
    }
}

// =============================================================================
// All-Stream Pages
// =============================================================================

/// A read of the global log, as a value.
///
/// This is the "next read" continuation: the notifier holds one, executes it,
/// and replaces it with [`ReadAllPage::next_request`] only when the page was
/// not empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAllRequest {
    /// Cursor to read from (inclusive).
    pub from_position: Position,
    /// Page size.
    pub max_count: usize,
    /// Whether payloads are loaded.
    pub prefetch: bool,
    /// Which way to walk.
    pub direction: ReadDirection,
    /// Filter applied to the raw page.
    pub filter: Option<AllStreamFilter>,
}

impl ReadAllRequest {
    /// Forward read with payloads.
    pub fn forwards(from_position: Position, max_count: usize) -> Self {
        Self {
            from_position,
            max_count,
            prefetch: true,
            direction: ReadDirection::Forward,
            filter: None,
        }
    }

    /// Backward read with payloads. Use `Position::END` to start at the head.
    pub fn backwards(from_position: Position, max_count: usize) -> Self {
        Self {
            direction: ReadDirection::Backward,
            ..Self::forwards(from_position, max_count)
        }
    }

    /// Sets whether payloads are loaded.
    pub fn with_prefetch(mut self, prefetch: bool) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Attaches a filter.
    pub fn with_filter(mut self, filter: AllStreamFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Runs the read against a store.
    pub async fn execute<S>(&self, store: &S, cancel: &CancellationToken) -> Result<ReadAllPage>
    where
        S: ReadonlyStreamStore + ?Sized,
    {
        let filter = self.filter.as_ref();
        match self.direction {
            ReadDirection::Forward => {
                store
                    .read_all_forwards(self.from_position, self.max_count, self.prefetch, filter, cancel)
                    .await
            }
            ReadDirection::Backward => {
                store
                    .read_all_backwards(self.from_position, self.max_count, self.prefetch, filter, cancel)
                    .await
            }
        }
    }
}

/// A page of the global log.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAllPage {
    /// The cursor this page was read from.
    pub from_position: Position,
    /// The cursor to resume from.
    pub next_position: Position,
    /// Which way this page walked.
    pub direction: ReadDirection,
    /// True when no further messages exist beyond this page at read time.
    pub is_end: bool,
    /// Page size the read was issued with.
    pub max_count: usize,
    /// Whether payloads were loaded.
    pub prefetch: bool,
    /// Filter the page was read with.
    pub filter: Option<AllStreamFilter>,
    /// Messages that passed the filter, in `direction` order.
    pub messages: Vec<StreamMessage>,
}

impl ReadAllPage {
    /// Builds a page from up to `max_count + 1` fetched rows, then filters it.
    pub(crate) fn from_fetch(
        from_position: Position,
        direction: ReadDirection,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        mut fetched: Vec<StreamMessage>,
    ) -> Self {
        let is_end = fetched.len() <= max_count;
        fetched.truncate(max_count);

        let next_position = match (direction, fetched.last()) {
            (ReadDirection::Forward, Some(last)) => last.position.next(),
            (ReadDirection::Forward, None) => from_position,
            (ReadDirection::Backward, Some(last)) => last.position.prev(),
            (ReadDirection::Backward, None) => Position::NONE,
        };

        fetched.retain(|message| satisfies(filter, message));

        Self {
            from_position,
            next_position,
            direction,
            is_end,
            max_count,
            prefetch,
            filter: filter.cloned(),
            messages: fetched,
        }
    }

    /// The read that continues after this page.
    pub fn next_request(&self) -> ReadAllRequest {
        ReadAllRequest {
            from_position: self.next_position,
            max_count: self.max_count,
            prefetch: self.prefetch,
            direction: self.direction,
            filter: self.filter.clone(),
        }
    }

    /// Re-issues the read from this page's `next_position`.
    pub async fn read_next<S>(&self, store: &S, cancel: &CancellationToken) -> Result<ReadAllPage>
    where
        S: ReadonlyStreamStore + ?Sized,
    {
        self.next_request().execute(store, cancel).await
    }
}

// =============================================================================
// Tests
// =============================================================================
