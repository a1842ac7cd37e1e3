//! # Message Reader
//!
//! The read side of the SQLite backend. Reads go straight to SQL on read-only
//! connections, so they always see the latest commit of the writer thread.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Reader Pool                                │
//! │                                                                  │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐            │
//! │  │Reader 1 │  │Reader 2 │  │Reader 3 │  │Reader N │            │
//! │  │(thread) │  │(thread) │  │(thread) │  │(thread) │            │
//! │  └────┬────┘  └────┬────┘  └────┬────┘  └────┬────┘            │
//! │       └────────────┴─────┬──────┴────────────┘                  │
//! │                 Read-only SQLite connections                     │
//! └──────────────────────────┬──────────────────────────────────────┘
//!                            ▼
//!                    ┌─────────────┐
//!                    │ SQLite (WAL)│
//!                    └─────────────┘
//! ```
//!
//! ## Snapshots
//!
//! A stream read looks up the head and then the messages. Both statements run
//! inside one read transaction so the page's `last_stream_version` always
//! agrees with its messages, even while the writer commits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::{Error, Result};
use crate::filter::AllStreamFilter;
use crate::page::{fetch_limit, ReadAllPage, ReadDirection, ReadStreamPage};
use crate::storage::{decode_message_id, message_checksum};
use crate::types::{Position, StreamHead, StreamId, StreamMessage, StreamVersion};

// =============================================================================
// Request Types
// =============================================================================

/// Request type for read operations.
pub enum ReadRequest {
    /// Read a page of one stream.
    ReadStream {
        stream_id: StreamId,
        from_version: StreamVersion,
        max_count: usize,
        direction: ReadDirection,
        response: oneshot::Sender<Result<ReadStreamPage>>,
    },
    /// Read a page of the global log.
    ReadAll {
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<AllStreamFilter>,
        direction: ReadDirection,
        response: oneshot::Sender<Result<ReadAllPage>>,
    },
    /// Get the greatest committed position.
    HeadPosition {
        response: oneshot::Sender<Result<Position>>,
    },
    /// Shutdown the reader.
    Shutdown,
}

// =============================================================================
// Row Decoding
// =============================================================================

const MESSAGE_COLUMNS: &str =
    "position, stream_id, stream_version, message_id, message_type, created_ms, metadata, checksum";

/// A message row before its id and checksum are checked.
struct RawMessage {
    position: i64,
    stream_id: String,
    stream_version: i64,
    message_id: Vec<u8>,
    message_type: String,
    created_ms: i64,
    metadata: Option<Vec<u8>>,
    checksum: i64,
    data: Option<Vec<u8>>,
}

impl RawMessage {
    /// Maps a row selected as `MESSAGE_COLUMNS, data`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            position: row.get(0)?,
            stream_id: row.get(1)?,
            stream_version: row.get(2)?,
            message_id: row.get(3)?,
            message_type: row.get(4)?,
            created_ms: row.get(5)?,
            metadata: row.get(6)?,
            checksum: row.get(7)?,
            data: row.get(8)?,
        })
    }

    fn into_message(self) -> Result<StreamMessage> {
        if let Some(data) = &self.data {
            if message_checksum(data, self.metadata.as_deref()) != self.checksum {
                warn!(position = self.position, "checksum mismatch");
                return Err(Error::Corruption {
                    position: self.position,
                });
            }
        }

        Ok(StreamMessage {
            message_id: decode_message_id(self.position, &self.message_id)?,
            stream_id: StreamId::new(self.stream_id),
            stream_version: StreamVersion::from_raw(self.stream_version),
            position: Position::from_raw(self.position),
            created_at: DateTime::<Utc>::from_timestamp_millis(self.created_ms).unwrap_or_default(),
            message_type: self.message_type,
            data: self.data,
            metadata: self.metadata,
        })
    }
}

fn collect_messages(
    stmt: &mut rusqlite::CachedStatement<'_>,
    params: impl rusqlite::Params,
) -> Result<Vec<StreamMessage>> {
    let rows = stmt.query_map(params, RawMessage::from_row)?;
    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?.into_message()?);
    }
    Ok(messages)
}

// =============================================================================
// Direct Read Functions
// =============================================================================

/// Returns the head of a stream, or `None` if it does not exist.
pub fn stream_head(conn: &Connection, stream_id: &StreamId) -> Result<Option<StreamHead>> {
    let head = conn
        .query_row(
            "SELECT version, position FROM streams WHERE stream_id = ?",
            [stream_id.as_str()],
            |row| {
                Ok(StreamHead::new(
                    StreamVersion::from_raw(row.get(0)?),
                    Position::from_raw(row.get(1)?),
                ))
            },
        )
        .optional()?;
    Ok(head)
}

/// Reads a page of one stream. Payloads are always loaded.
pub fn read_stream(
    conn: &Connection,
    stream_id: &StreamId,
    from_version: StreamVersion,
    max_count: usize,
    direction: ReadDirection,
) -> Result<ReadStreamPage> {
    let tx = conn.unchecked_transaction()?;

    let Some(head) = stream_head(&tx, stream_id)? else {
        return Ok(ReadStreamPage::not_found(
            stream_id.clone(),
            from_version,
            direction,
            max_count,
        ));
    };

    let sql = match direction {
        ReadDirection::Forward => format!(
            "SELECT {MESSAGE_COLUMNS}, data FROM messages
             WHERE stream_id = ? AND stream_version >= ?
             ORDER BY stream_version ASC LIMIT ?"
        ),
        ReadDirection::Backward => format!(
            "SELECT {MESSAGE_COLUMNS}, data FROM messages
             WHERE stream_id = ? AND stream_version <= ?
             ORDER BY stream_version DESC LIMIT ?"
        ),
    };

    let fetched = {
        let mut stmt = tx.prepare_cached(&sql)?;
        collect_messages(
            &mut stmt,
            params![stream_id.as_str(), from_version.as_raw(), fetch_limit(max_count)],
        )?
    };
    tx.finish()?;

    Ok(ReadStreamPage::from_fetch(
        stream_id.clone(),
        head,
        from_version,
        direction,
        max_count,
        fetched,
    ))
}

/// Reads a page of the global log.
///
/// Without `prefetch` the payload column is not selected and messages come
/// back with `data: None`; their checksum is verified when the payload is
/// loaded later.
pub fn read_all(
    conn: &Connection,
    from_position: Position,
    max_count: usize,
    prefetch: bool,
    filter: Option<&AllStreamFilter>,
    direction: ReadDirection,
) -> Result<ReadAllPage> {
    let data_column = if prefetch { "data" } else { "NULL" };
    let sql = match direction {
        ReadDirection::Forward => format!(
            "SELECT {MESSAGE_COLUMNS}, {data_column} FROM messages
             WHERE position >= ?
             ORDER BY position ASC LIMIT ?"
        ),
        ReadDirection::Backward => format!(
            "SELECT {MESSAGE_COLUMNS}, {data_column} FROM messages
             WHERE position <= ?
             ORDER BY position DESC LIMIT ?"
        ),
    };

    let mut stmt = conn.prepare_cached(&sql)?;
    let fetched = collect_messages(
        &mut stmt,
        params![from_position.as_raw(), fetch_limit(max_count)],
    )?;

    Ok(ReadAllPage::from_fetch(
        from_position,
        direction,
        max_count,
        prefetch,
        filter,
        fetched,
    ))
}

/// Returns the greatest committed position, or `Position::NONE` if empty.
pub fn read_head_position(conn: &Connection) -> Result<Position> {
    let max_position: Option<i64> =
        conn.query_row("SELECT MAX(position) FROM messages", [], |row| row.get(0))?;
    Ok(max_position.map_or(Position::NONE, Position::from_raw))
}

// =============================================================================
// Reader Loop
// =============================================================================

/// Runs a reader that shares a request channel with the rest of the pool.
///
/// Threads compete for requests; whichever holds the receiver lock takes the
/// next one. Returns on `Shutdown` or when every sender is gone.
pub async fn run_reader_pooled(
    conn: Connection,
    rx: Arc<std::sync::Mutex<mpsc::Receiver<ReadRequest>>>,
) {
    loop {
        let request = {
            let Ok(mut guard) = rx.lock() else {
                warn!("reader receiver lock poisoned, stopping reader");
                break;
            };
            guard.recv().await
        };

        match request {
            Some(ReadRequest::ReadStream {
                stream_id,
                from_version,
                max_count,
                direction,
                response,
            }) => {
                let result = read_stream(&conn, &stream_id, from_version, max_count, direction);
                let _ = response.send(result);
            }
            Some(ReadRequest::ReadAll {
                from_position,
                max_count,
                prefetch,
                filter,
                direction,
                response,
            }) => {
                let result = read_all(
                    &conn,
                    from_position,
                    max_count,
                    prefetch,
                    filter.as_ref(),
                    direction,
                );
                let _ = response.send(result);
            }
            Some(ReadRequest::HeadPosition { response }) => {
                let _ = response.send(read_head_position(&conn));
            }
            Some(ReadRequest::Shutdown) | None => break,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
