//! # SQLite Schema
//!
//! Table definitions, pragmas and schema versioning for the SQLite backend.
//!
//! ## Table Overview
//!
//! ```text
//! streams                         messages
//! ┌──────────────────┐            ┌──────────────────────┐
//! │ stream_id (PK)   │◄───────────│ stream_id            │
//! │ version          │            │ position (PK)        │
//! │ position         │            │ stream_version       │
//! │ created_ms       │            │ message_id (BLOB 16) │
//! └──────────────────┘            │ message_type         │
//!                                 │ created_ms           │
//! streamstore_metadata            │ data, metadata       │
//! ┌──────────────────┐            │ checksum             │
//! │ key (PK), value  │            └──────────────────────┘
//! └──────────────────┘
//! ```
//!
//! `streams` is the head table: one row per stream, updated in the same
//! transaction as the message inserts. A stream created by an empty append has
//! a row here with `version = -1` and no messages.

use std::path::Path;

use rusqlite::Connection;

use crate::error::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// There are no migrations: a mismatching database is refused.
const SCHEMA_VERSION: i32 = 1;

// =============================================================================
// DDL Statements
// =============================================================================

/// One row per stream.
///
/// - `version`: latest stream version, `-1` for an empty stream
/// - `position`: global position of that message, `-1` for an empty stream
const CREATE_STREAMS: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    stream_id  TEXT PRIMARY KEY,
    version    INTEGER NOT NULL,
    position   INTEGER NOT NULL,
    created_ms INTEGER NOT NULL
)
"#;

/// The global log.
///
/// # Columns
///
/// - `position`: unique, strictly increasing, never reused (PK)
/// - `stream_id`, `stream_version`: the message's place in its stream
/// - `message_id`: caller-supplied UUID, 16 raw bytes
/// - `checksum`: XXH3-64 of `data` followed by `metadata`
const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    position       INTEGER PRIMARY KEY,
    stream_id      TEXT NOT NULL REFERENCES streams(stream_id),
    stream_version INTEGER NOT NULL,
    message_id     BLOB NOT NULL,
    message_type   TEXT NOT NULL,
    created_ms     INTEGER NOT NULL,
    data           BLOB NOT NULL,
    metadata       BLOB,
    checksum       INTEGER NOT NULL
)
"#;

/// Enforces gap-free, duplicate-free versions and serves stream reads.
const CREATE_MESSAGES_STREAM_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_stream_version
ON messages(stream_id, stream_version)
"#;

/// Serves the id lookups of append reconciliation.
const CREATE_MESSAGES_ID_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_stream_message_id
ON messages(stream_id, message_id)
"#;

const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS streamstore_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the schema applied.
///
/// # Rust Pattern: Newtype Wrapper
///
/// Wrapping `Connection` means a value of this type is proof that the tables
/// exist and the version was checked. [`Database::into_connection`] hands the
/// raw connection to the writer thread once that is done.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Gives up the wrapper and returns the initialized connection.
    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn initialize(&mut self) -> Result<()> {
        // WAL lets the reader pool see committed data while the writer works.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;
        self.conn.execute_batch("PRAGMA foreign_keys = ON")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_STREAMS)?;
        self.conn.execute_batch(CREATE_MESSAGES)?;
        self.conn.execute_batch(CREATE_MESSAGES_STREAM_INDEX)?;
        self.conn.execute_batch(CREATE_MESSAGES_ID_INDEX)?;

        self.verify_or_set_version()
    }

    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = match self.conn.query_row(
            "SELECT value FROM streamstore_metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        ) {
            Ok(value) => Some(value),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO streamstore_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v == SCHEMA_VERSION.to_string() => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this build requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table_count(conn: &Connection) -> i32 {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )
        .expect("should query tables")
    }

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().expect("should create in-memory db");
        // metadata, streams, messages
        assert_eq!(table_count(&db.conn), 3);
    }

    #[test]
    fn test_message_requires_stream_row() {
        let db = Database::open_in_memory().expect("should create db");
        let insert = "INSERT INTO messages
             (position, stream_id, stream_version, message_id, message_type, created_ms, data, checksum)
             VALUES (0, 'orphan', 0, x'00000000000000000000000000000001', 'type', 0, x'', 0)";

        assert!(db.conn.execute(insert, []).is_err());

        db.conn
            .execute(
                "INSERT INTO streams (stream_id, version, position, created_ms) VALUES ('orphan', -1, -1, 0)",
                [],
            )
            .expect("should insert stream");
        db.conn.execute(insert, []).expect("should insert message");
    }

    #[test]
    fn test_indexes_created() {
        let db = Database::open_in_memory().expect("should create db");

        let indexes: Vec<String> = {
            let mut stmt = db
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%'")
                .expect("should prepare");

            stmt.query_map([], |row| row.get(0))
                .expect("should query")
                .collect::<std::result::Result<Vec<_>, _>>()
                .expect("should collect")
        };

        assert!(indexes.contains(&"messages_stream_version".to_string()));
        assert!(indexes.contains(&"messages_stream_message_id".to_string()));
    }

    #[test]
    fn test_double_initialization() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("test.db");

        {
            let _db = Database::open(&path).expect("first open should work");
        }

        let db = Database::open(&path).expect("second open should work");
        assert_eq!(table_count(&db.conn), 3);
    }

    #[test]
    fn test_schema_version_mismatch() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("test.db");

        {
            let db = Database::open(&path).expect("open should work");
            db.conn
                .execute(
                    "UPDATE streamstore_metadata SET value = '99' WHERE key = 'schema_version'",
                    [],
                )
                .expect("should update");
        }

        let err = Database::open(&path).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }
}
