//! # In-Memory Backend
//!
//! A complete [`StreamStore`] held in process memory. Useful for tests and for
//! embedding where durability is not needed.
//!
//! ## Serialization Point
//!
//! All state sits behind one mutex. An append takes the lock, runs the append
//! engine against the locked state (which implements [`StreamLedger`]), and
//! releases it. Readers take the same lock, so every read sees a state where
//! each append is either fully present or fully absent.
//!
//! ```text
//! ┌──────────────────────── Mutex<MemoryState> ───────────────────────┐
//! │ streams: "order-1" → [p0, p2]  ids {a→0, c→1}                    │
//! │          "order-2" → [p1]      ids {b→0}                          │
//! │ log:     [p0 order-1/0] [p1 order-2/0] [p2 order-1/1]             │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Positions are indexes into `log`, so a position is never reused.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::append::{self, StreamLedger};
use crate::error::{Error, Result};
use crate::filter::AllStreamFilter;
use crate::page::{self, ReadAllPage, ReadDirection, ReadStreamPage};
use crate::store::{check_cancelled, ReadonlyStreamStore, StreamStore};
use crate::types::{
    AppendResult, ExpectedVersion, MessageId, NewStreamMessage, Position, StreamHead, StreamId,
    StreamMessage, StreamVersion,
};

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Default)]
struct MemoryStream {
    /// Global positions of the stream's messages; index is the version.
    positions: Vec<Position>,
    ids: HashMap<MessageId, StreamVersion>,
}

impl MemoryStream {
    fn head(&self) -> StreamHead {
        match self.positions.last() {
            Some(position) => StreamHead::new(
                StreamVersion::from_raw(self.positions.len() as i64 - 1),
                *position,
            ),
            None => StreamHead::EMPTY,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    streams: HashMap<StreamId, MemoryStream>,
    log: Vec<StreamMessage>,
}

impl MemoryState {
    fn message_at(&self, position: Position, prefetch: bool) -> Option<StreamMessage> {
        let index = usize::try_from(position.as_raw()).ok()?;
        self.log.get(index).map(|message| {
            let mut message = message.clone();
            if !prefetch {
                message.data = None;
            }
            message
        })
    }
}

impl StreamLedger for MemoryState {
    fn stream_head(&mut self, stream_id: &StreamId) -> Result<Option<StreamHead>> {
        Ok(self.streams.get(stream_id).map(MemoryStream::head))
    }

    fn message_ids(
        &mut self,
        stream_id: &StreamId,
        from: StreamVersion,
        count: usize,
    ) -> Result<Vec<MessageId>> {
        let Some(stream) = self.streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        let start = from.as_raw().max(0) as usize;
        Ok(stream
            .positions
            .iter()
            .skip(start)
            .take(count)
            .filter_map(|position| self.log.get(position.as_raw() as usize))
            .map(|message| message.message_id)
            .collect())
    }

    fn find_version(
        &mut self,
        stream_id: &StreamId,
        message_id: &MessageId,
    ) -> Result<Option<StreamVersion>> {
        Ok(self
            .streams
            .get(stream_id)
            .and_then(|stream| stream.ids.get(message_id).copied()))
    }

    fn write(
        &mut self,
        stream_id: &StreamId,
        _head: Option<StreamHead>,
        messages: &[NewStreamMessage],
    ) -> Result<StreamHead> {
        let created_at = Utc::now();
        let stream = self.streams.entry(stream_id.clone()).or_default();

        for message in messages {
            let version = StreamVersion::from_raw(stream.positions.len() as i64);
            let position = Position::from_raw(self.log.len() as i64);

            self.log.push(StreamMessage {
                stream_id: stream_id.clone(),
                message_id: message.message_id,
                stream_version: version,
                position,
                created_at,
                message_type: message.message_type.clone(),
                data: Some(message.data.clone()),
                metadata: message.metadata.clone(),
            });
            stream.positions.push(position);
            stream.ids.insert(message.message_id, version);
        }

        Ok(stream.head())
    }
}

// =============================================================================
// InMemoryStreamStore
// =============================================================================

/// A [`StreamStore`] backed by process memory.
///
/// # Example
///
/// ```rust,ignore
/// use streamstore::{ExpectedVersion, InMemoryStreamStore, NewStreamMessage, StreamStore};
/// use tokio_util::sync::CancellationToken;
/// use uuid::Uuid;
///
/// let store = InMemoryStreamStore::new();
/// let cancel = CancellationToken::new();
/// let result = store
///     .append_to_stream(
///         &"order-1".into(),
///         ExpectedVersion::NoStream,
///         vec![NewStreamMessage::new(Uuid::new_v4(), "Created", b"{}".to_vec())],
///         &cancel,
///     )
///     .await?;
/// assert_eq!(result.current_version.as_raw(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStreamStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStreamStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Internal("in-memory store lock poisoned".to_string()))
    }

    fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        direction: ReadDirection,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        check_cancelled(cancel)?;
        page::validate_stream_read(stream_id, from_version, max_count, direction)?;

        let state = self.lock()?;
        let Some(stream) = state.streams.get(stream_id) else {
            return Ok(ReadStreamPage::not_found(
                stream_id.clone(),
                from_version,
                direction,
                max_count,
            ));
        };

        let limit = max_count.saturating_add(1);
        let len = stream.positions.len();
        let selected: Vec<Position> = match direction {
            ReadDirection::Forward => {
                let start = (from_version.as_raw() as usize).min(len);
                stream.positions[start..].iter().take(limit).copied().collect()
            }
            ReadDirection::Backward => {
                let end = from_version.as_raw().saturating_add(1).clamp(0, len as i64) as usize;
                stream.positions[..end].iter().rev().take(limit).copied().collect()
            }
        };

        let fetched = selected
            .into_iter()
            .filter_map(|position| state.message_at(position, true))
            .collect();

        Ok(ReadStreamPage::from_fetch(
            stream_id.clone(),
            stream.head(),
            from_version,
            direction,
            max_count,
            fetched,
        ))
    }

    fn read_all(
        &self,
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        direction: ReadDirection,
        cancel: &CancellationToken,
    ) -> Result<ReadAllPage> {
        check_cancelled(cancel)?;
        page::validate_all_read(from_position, max_count, direction)?;

        let state = self.lock()?;
        let limit = max_count.saturating_add(1);
        let len = state.log.len() as i64;

        let positions: Vec<i64> = match direction {
            ReadDirection::Forward => (from_position.as_raw()..len).take(limit).collect(),
            ReadDirection::Backward => {
                let start = from_position.as_raw().min(len - 1);
                (0..=start).rev().take(limit).collect()
            }
        };

        let fetched = positions
            .into_iter()
            .filter_map(|raw| state.message_at(Position::from_raw(raw), prefetch))
            .collect();

        Ok(ReadAllPage::from_fetch(
            from_position,
            direction,
            max_count,
            prefetch,
            filter,
            fetched,
        ))
    }
}

#[async_trait]
impl ReadonlyStreamStore for InMemoryStreamStore {
    async fn read_stream_forwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.read_stream(stream_id, from_version, max_count, ReadDirection::Forward, cancel)
    }

    async fn read_stream_backwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.read_stream(stream_id, from_version, max_count, ReadDirection::Backward, cancel)
    }

    async fn read_all_forwards(
        &self,
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        cancel: &CancellationToken,
    ) -> Result<ReadAllPage> {
        self.read_all(from_position, max_count, prefetch, filter, ReadDirection::Forward, cancel)
    }

    async fn read_all_backwards(
        &self,
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        cancel: &CancellationToken,
    ) -> Result<ReadAllPage> {
        self.read_all(from_position, max_count, prefetch, filter, ReadDirection::Backward, cancel)
    }

    async fn read_head_position(&self, cancel: &CancellationToken) -> Result<Position> {
        check_cancelled(cancel)?;
        let state = self.lock()?;
        Ok(Position::from_raw(state.log.len() as i64 - 1))
    }
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
        cancel: &CancellationToken,
    ) -> Result<AppendResult> {
        check_cancelled(cancel)?;
        let mut state = self.lock()?;
        append::append_to_stream(&mut *state, stream_id, expected, &messages)
    }
}

// =============================================================================
// Tests
// =============================================================================
