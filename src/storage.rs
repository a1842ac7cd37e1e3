//! # Synchronous Storage Layer
//!
//! The write side of the SQLite backend. A single `Storage` owns the
//! read-write connection and runs every append as one SQLite transaction.
//!
//! ## Design: Single-Writer Architecture
//!
//! All appends go through one `Storage` instance on one thread, so:
//!
//! - the append engine never races another writer between its reads and its write
//! - the next-position counter can be cached in memory
//! - SQLite performs best with single-writer workloads
//!
//! ## The Append Transaction
//!
//! ```text
//! BEGIN
//!   SqliteLedger ── stream_head / message_ids / find_version ──► SELECT ...
//!   append engine decides
//!   SqliteLedger::write ──► INSERT streams (new) / INSERT messages / UPDATE streams
//! COMMIT ──► next_position = ledger.next_position
//! ```
//!
//! A conflict or a failed statement drops the transaction, which rolls back.
//!
//! ## Invariant: Memory Lags Disk
//!
//! The cached next position is only advanced AFTER a successful commit. A
//! rejected or failed append leaves it untouched, so positions are never
//! skipped and never reused.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use xxhash_rust::xxh3::Xxh3;

use crate::append::{self, StreamLedger};
use crate::error::{Error, Result};
use crate::types::{
    AppendResult, ExpectedVersion, MessageId, NewStreamMessage, Position, StreamHead, StreamId,
    StreamVersion,
};

// =============================================================================
// Checksums
// =============================================================================

/// XXH3-64 over a message's payload and metadata.
///
/// The payload length goes in first so that moving bytes between `data` and
/// `metadata` changes the checksum.
pub(crate) fn message_checksum(data: &[u8], metadata: Option<&[u8]>) -> i64 {
    let mut hasher = Xxh3::new();
    hasher.update(&(data.len() as u64).to_le_bytes());
    hasher.update(data);
    if let Some(metadata) = metadata {
        hasher.update(metadata);
    }
    hasher.digest() as i64
}

// =============================================================================
// Ledger over a Transaction
// =============================================================================

/// [`StreamLedger`] backed by an open SQLite transaction.
struct SqliteLedger<'a> {
    conn: &'a Connection,
    next_position: Position,
}

impl StreamLedger for SqliteLedger<'_> {
    fn stream_head(&mut self, stream_id: &StreamId) -> Result<Option<StreamHead>> {
        let head = self
            .conn
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

    fn message_ids(
        &mut self,
        stream_id: &StreamId,
        from: StreamVersion,
        count: usize,
    ) -> Result<Vec<MessageId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT position, message_id FROM messages
             WHERE stream_id = ? AND stream_version >= ?
             ORDER BY stream_version
             LIMIT ?",
        )?;

        let rows = stmt.query_map(
            params![stream_id.as_str(), from.as_raw(), count as i64],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        )?;

        let mut ids = Vec::with_capacity(count);
        for row in rows {
            let (position, bytes) = row?;
            ids.push(decode_message_id(position, &bytes)?);
        }
        Ok(ids)
    }

    fn find_version(
        &mut self,
        stream_id: &StreamId,
        message_id: &MessageId,
    ) -> Result<Option<StreamVersion>> {
        let version = self
            .conn
            .query_row(
                "SELECT stream_version FROM messages WHERE stream_id = ? AND message_id = ?",
                params![stream_id.as_str(), message_id.as_bytes().as_slice()],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(version.map(StreamVersion::from_raw))
    }

    fn write(
        &mut self,
        stream_id: &StreamId,
        head: Option<StreamHead>,
        messages: &[NewStreamMessage],
    ) -> Result<StreamHead> {
        let now_ms = Utc::now().timestamp_millis();

        if head.is_none() {
            self.conn.execute(
                "INSERT INTO streams (stream_id, version, position, created_ms) VALUES (?, -1, -1, ?)",
                params![stream_id.as_str(), now_ms],
            )?;
        }

        let mut current = head.unwrap_or(StreamHead::EMPTY);
        if messages.is_empty() {
            return Ok(current);
        }

        let mut insert = self.conn.prepare_cached(
            "INSERT INTO messages
                 (position, stream_id, stream_version, message_id, message_type, created_ms, data, metadata, checksum)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        let mut position = self.next_position;
        for message in messages {
            let version = current.version.next();
            insert.execute(params![
                position.as_raw(),
                stream_id.as_str(),
                version.as_raw(),
                message.message_id.as_bytes().as_slice(),
                message.message_type,
                now_ms,
                message.data,
                message.metadata,
                message_checksum(&message.data, message.metadata.as_deref()),
            ])?;
            current = StreamHead::new(version, position);
            position = position.next();
        }

        self.conn.execute(
            "UPDATE streams SET version = ?, position = ? WHERE stream_id = ?",
            params![current.version.as_raw(), current.position.as_raw(), stream_id.as_str()],
        )?;

        self.next_position = position;
        Ok(current)
    }
}

/// Converts a stored 16-byte id back into a [`MessageId`].
pub(crate) fn decode_message_id(position: i64, bytes: &[u8]) -> Result<MessageId> {
    MessageId::from_slice(bytes).ok_or_else(|| {
        Error::Schema(format!(
            "invalid message id at position {position}: expected 16 bytes, found {}",
            bytes.len()
        ))
    })
}

// =============================================================================
// Storage
// =============================================================================

/// The write side of the SQLite backend.
///
/// # Thread Safety
///
/// `Storage` is NOT thread-safe. It is owned by the writer thread; other
/// threads talk to it through a channel.
pub struct Storage {
    conn: Connection,

    /// Position the next committed message will get.
    next_position: Position,
}

impl Storage {
    /// Wraps an initialized connection (schema already created) and loads the
    /// next position from disk.
    pub fn new(conn: Connection) -> Result<Self> {
        let max_position: Option<i64> =
            conn.query_row("SELECT MAX(position) FROM messages", [], |row| row.get(0))?;

        let next_position = match max_position {
            Some(position) => Position::from_raw(position).next(),
            None => Position::START,
        };

        Ok(Self {
            conn,
            next_position,
        })
    }

    /// Returns the position the next committed message will get.
    pub fn next_position(&self) -> Position {
        self.next_position
    }

    /// Appends a batch to a stream in one transaction.
    ///
    /// # Errors
    ///
    /// Everything [`append::append_to_stream`] returns. On any error the
    /// transaction rolls back and the cached next position is unchanged.
    pub fn append(
        &mut self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        messages: &[NewStreamMessage],
    ) -> Result<AppendResult> {
        let tx = self.conn.transaction()?;

        let mut ledger = SqliteLedger {
            conn: &tx,
            next_position: self.next_position,
        };
        let result = append::append_to_stream(&mut ledger, stream_id, expected, messages)?;
        let next_position = ledger.next_position;

        tx.commit()?;

        // Memory never leads disk.
        self.next_position = next_position;

        Ok(result)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::schema::Database;

    fn create_test_storage() -> Storage {
        let db = Database::open_in_memory().unwrap();
        Storage::new(db.into_connection()).unwrap()
    }

    fn msgs(ids: &[u128]) -> Vec<NewStreamMessage> {
        ids.iter()
            .map(|id| NewStreamMessage::new(Uuid::from_u128(*id), "type", b"payload".to_vec()))
            .collect()
    }

    fn stream(id: &str) -> StreamId {
        StreamId::new(id)
    }

    #[test]
    fn test_append_assigns_versions_and_positions() {
        let mut storage = create_test_storage();

        let result = storage
            .append(&stream("stream-1"), ExpectedVersion::NoStream, &msgs(&[1, 2, 3]))
            .unwrap();

        assert_eq!(result.current_version.as_raw(), 2);
        assert_eq!(result.current_position.as_raw(), 2);
        assert_eq!(storage.next_position().as_raw(), 3);

        let result = storage
            .append(&stream("stream-2"), ExpectedVersion::NoStream, &msgs(&[1, 2, 3]))
            .unwrap();
        assert_eq!(result.current_version.as_raw(), 2);
        assert_eq!(result.current_position.as_raw(), 5);
    }

    #[test]
    fn test_idempotent_retry_consumes_no_positions() {
        let mut storage = create_test_storage();
        let id = stream("stream-1");

        let first = storage.append(&id, ExpectedVersion::NoStream, &msgs(&[1, 2])).unwrap();
        let retry = storage.append(&id, ExpectedVersion::NoStream, &msgs(&[1, 2])).unwrap();

        assert_eq!(first, retry);
        assert_eq!(storage.next_position().as_raw(), 2);

        let count: i64 = storage
            .connection()
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_rejected_append_rolls_back() {
        let mut storage = create_test_storage();
        let id = stream("stream-1");

        storage.append(&id, ExpectedVersion::NoStream, &msgs(&[1, 2, 3])).unwrap();
        let err = storage
            .append(&id, ExpectedVersion::Exact(StreamVersion::from_raw(0)), &msgs(&[4]))
            .unwrap_err();

        assert!(err.is_wrong_expected_version());
        assert_eq!(storage.next_position().as_raw(), 3);

        let version: i64 = storage
            .connection()
            .query_row("SELECT version FROM streams WHERE stream_id = 'stream-1'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_empty_append_creates_stream_row() {
        let mut storage = create_test_storage();

        let result = storage
            .append(&stream("empty"), ExpectedVersion::NoStream, &[])
            .unwrap();

        assert_eq!(result.current_version, StreamVersion::NONE);
        assert_eq!(result.current_position, Position::NONE);

        let (version, position): (i64, i64) = storage
            .connection()
            .query_row(
                "SELECT version, position FROM streams WHERE stream_id = 'empty'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!((version, position), (-1, -1));

        // A second NoStream append of new messages now conflicts.
        let err = storage
            .append(&stream("empty"), ExpectedVersion::NoStream, &msgs(&[1]))
            .unwrap_err();
        assert!(err.is_wrong_expected_version());
    }

    #[test]
    fn test_next_position_recovered_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let db = Database::open(&path).unwrap();
            let mut storage = Storage::new(db.into_connection()).unwrap();
            storage
                .append(&stream("stream-1"), ExpectedVersion::Any, &msgs(&[1, 2, 3, 4]))
                .unwrap();
        }

        let db = Database::open(&path).unwrap();
        let storage = Storage::new(db.into_connection()).unwrap();
        assert_eq!(storage.next_position().as_raw(), 4);
    }

    #[test]
    fn test_checksum_covers_data_and_metadata() {
        let plain = message_checksum(b"data", None);
        assert_eq!(plain, message_checksum(b"data", None));
        assert_ne!(plain, message_checksum(b"data", Some(b"meta")));
        assert_ne!(message_checksum(b"ab", None), message_checksum(b"a", Some(b"b")));
    }
}
