//! # SQLite Backend
//!
//! [`SqliteStreamStore`] is the durable [`StreamStore`]. It wraps the
//! synchronous storage layer with Tokio channels so it can be used from async
//! code without blocking the runtime.
//!
//! ## The SQLite Challenge
//!
//! SQLite's `Connection` is `!Sync`, so it can't be shared across threads even
//! with `Arc`. Each connection is instead owned by one dedicated OS thread:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Async Tasks                                   │
//! └────────────────────────────────┬────────────────────────────────────────┘
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!            ┌───────────────┐         ┌─────────────────────┐
//!            │ Writer thread │         │     Reader pool     │
//!            │  ┌─────────┐  │         │  ┌───┐ ┌───┐ ┌───┐ │
//!            │  │ Storage │  │         │  │ R │ │ R │ │ R │ │
//!            │  │  (R/W)  │  │         │  └───┘ └───┘ └───┘ │
//!            │  └─────────┘  │         │  Read-only conns    │
//!            └───────┬───────┘         └──────────┬──────────┘
//!                    └─────────────┬──────────────┘
//!                                  ▼
//!                          ┌─────────────┐
//!                          │ SQLite (WAL)│
//!                          └─────────────┘
//! ```
//!
//! The writer thread is the single serialization point for appends: the append
//! engine's reads and its write happen inside one transaction on that thread.
//!
//! ## Cancellation
//!
//! A caller that cancels stops waiting immediately. The writer checks the
//! token before opening the transaction, so an append cancelled while queued
//! never runs; one that already started commits or rolls back as a whole.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::filter::AllStreamFilter;
use crate::page::{self, ReadAllPage, ReadDirection, ReadStreamPage};
use crate::reader::{self, ReadRequest};
use crate::schema::Database;
use crate::storage::Storage;
use crate::store::{check_cancelled, ReadonlyStreamStore, StreamStore};
use crate::types::{
    AppendResult, ExpectedVersion, NewStreamMessage, Position, StreamId, StreamVersion,
};

// =============================================================================
// Configuration
// =============================================================================

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

/// Size of the write request channel.
const WRITE_CHANNEL_SIZE: usize = 1024;

// =============================================================================
// Writer Thread
// =============================================================================

enum WriteRequest {
    Append {
        stream_id: StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
        cancel: CancellationToken,
        response: oneshot::Sender<Result<AppendResult>>,
    },
    Shutdown,
}

/// Serves write requests until `Shutdown` or until every sender is gone.
fn run_writer(mut storage: Storage, mut rx: mpsc::Receiver<WriteRequest>) {
    while let Some(request) = rx.blocking_recv() {
        match request {
            WriteRequest::Append {
                stream_id,
                expected,
                messages,
                cancel,
                response,
            } => {
                let result = if cancel.is_cancelled() {
                    Err(Error::Cancelled)
                } else {
                    storage.append(&stream_id, expected, &messages)
                };
                if let Err(e) = &result {
                    debug!(stream_id = %stream_id, expected = %expected, error = %e, "append rejected");
                }
                let _ = response.send(result);
            }
            WriteRequest::Shutdown => break,
        }
    }
}

// =============================================================================
// SqliteStreamStore
// =============================================================================

/// The durable stream store.
///
/// # Thread Safety
///
/// `SqliteStreamStore` is `Clone`, `Send`, and `Sync`. All clones share the
/// same writer thread and reader pool.
///
/// # Example
///
/// ```rust,ignore
/// use streamstore::{ExpectedVersion, NewStreamMessage, SqliteStreamStore, StreamStore};
/// use tokio_util::sync::CancellationToken;
///
/// let store = SqliteStreamStore::open("events.db").await?;
/// let cancel = CancellationToken::new();
///
/// store
///     .append_to_stream(&"order-1".into(), ExpectedVersion::NoStream, messages, &cancel)
///     .await?;
///
/// store.shutdown().await;
/// ```
#[derive(Clone)]
pub struct SqliteStreamStore {
    write_tx: mpsc::Sender<WriteRequest>,
    read_tx: mpsc::Sender<ReadRequest>,

    /// Writer and reader threads (for shutdown).
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,

    reader_count: usize,
}

impl SqliteStreamStore {
    /// Opens or creates a database at `path` with the default reader pool size.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(&StorageConfig::with_path(path)).await
    }

    /// Opens or creates a database as described by `config`.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        // The writer connection creates the schema before any reader opens.
        let db = Database::open(path)?;
        let storage = Storage::new(db.into_connection())?;
        let next_position = storage.next_position();

        let reader_count = config.reader_count();
        let mut reader_conns = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            reader_conns.push(Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?);
        }

        let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_SIZE);
        let mut threads = Vec::with_capacity(reader_count + 1);

        threads.push(
            thread::Builder::new()
                .name("streamstore-writer".to_string())
                .spawn(move || run_writer(storage, write_rx))
                .map_err(|e| Error::Internal(format!("failed to spawn writer thread: {e}")))?,
        );

        // Threads compete to receive from the shared channel.
        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_SIZE);
        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));

        for (i, conn) in reader_conns.into_iter().enumerate() {
            let rx = Arc::clone(&read_rx);
            let handle = thread::Builder::new()
                .name(format!("streamstore-reader-{i}"))
                .spawn(move || {
                    let rt = match tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                    {
                        Ok(rt) => rt,
                        Err(e) => {
                            warn!(error = %e, "failed to create reader runtime");
                            return;
                        }
                    };
                    rt.block_on(reader::run_reader_pooled(conn, rx));
                })
                .map_err(|e| Error::Internal(format!("failed to spawn reader thread: {e}")))?;
            threads.push(handle);
        }

        info!(
            path = %config.path,
            readers = reader_count,
            next_position = %next_position,
            "opened sqlite stream store"
        );

        Ok(Self {
            write_tx,
            read_tx,
            threads: Arc::new(Mutex::new(threads)),
            reader_count,
        })
    }

    /// Returns the number of reader threads in the pool.
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    async fn read<T>(
        &self,
        request: ReadRequest,
        response_rx: oneshot::Receiver<Result<T>>,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.read_tx
            .send(request)
            .await
            .map_err(|_| Error::ShutDown("reader thread has shut down".to_string()))?;

        await_response(response_rx, cancel, "reader dropped response channel").await
    }

    async fn read_stream(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        direction: ReadDirection,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        check_cancelled(cancel)?;
        page::validate_stream_read(stream_id, from_version, max_count, direction)?;

        let (response, response_rx) = oneshot::channel();
        let request = ReadRequest::ReadStream {
            stream_id: stream_id.clone(),
            from_version,
            max_count,
            direction,
            response,
        };
        self.read(request, response_rx, cancel).await
    }

    async fn read_all(
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

        let (response, response_rx) = oneshot::channel();
        let request = ReadRequest::ReadAll {
            from_position,
            max_count,
            prefetch,
            filter: filter.cloned(),
            direction,
            response,
        };
        self.read(request, response_rx, cancel).await
    }

    /// Shuts down the writer and reader threads and waits for them.
    ///
    /// Requests already queued are served first. After shutdown every
    /// operation on any clone fails with `Error::ShutDown`.
    pub async fn shutdown(self) {
        let _ = self.write_tx.send(WriteRequest::Shutdown).await;
        for _ in 0..self.reader_count {
            let _ = self.read_tx.send(ReadRequest::Shutdown).await;
        }

        let handles = std::mem::take(&mut *self.threads.lock().await);
        for handle in handles {
            let _ = handle.join();
        }
        info!("sqlite stream store shut down");
    }
}

/// Waits for a reply, giving up as soon as `cancel` fires.
async fn await_response<T>(
    mut response_rx: oneshot::Receiver<Result<T>>,
    cancel: &CancellationToken,
    dropped: &str,
) -> Result<T> {
    tokio::select! {
        biased;
        response = &mut response_rx => {
            response.map_err(|_| Error::ShutDown(dropped.to_string()))?
        }
        _ = cancel.cancelled() => Err(Error::Cancelled),
    }
}

#[async_trait]
impl ReadonlyStreamStore for SqliteStreamStore {
    async fn read_stream_forwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.read_stream(stream_id, from_version, max_count, ReadDirection::Forward, cancel)
            .await
    }

    async fn read_stream_backwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage> {
        self.read_stream(stream_id, from_version, max_count, ReadDirection::Backward, cancel)
            .await
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
            .await
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
            .await
    }

    async fn read_head_position(&self, cancel: &CancellationToken) -> Result<Position> {
        check_cancelled(cancel)?;
        let (response, response_rx) = oneshot::channel();
        self.read(ReadRequest::HeadPosition { response }, response_rx, cancel)
            .await
    }
}

#[async_trait]
impl StreamStore for SqliteStreamStore {
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
        cancel: &CancellationToken,
    ) -> Result<AppendResult> {
        check_cancelled(cancel)?;

        let (response, response_rx) = oneshot::channel();
        self.write_tx
            .send(WriteRequest::Append {
                stream_id: stream_id.clone(),
                expected,
                messages,
                cancel: cancel.clone(),
                response,
            })
            .await
            .map_err(|_| Error::ShutDown("writer thread has shut down".to_string()))?;

        await_response(response_rx, cancel, "writer dropped response channel").await
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::page::PageReadStatus;

    /// Returns (store, temp_dir) - temp_dir must be kept alive for the store to work.
    async fn test_store() -> (SqliteStreamStore, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = StorageConfig {
            path: temp_dir.path().join("test.db").to_string_lossy().into_owned(),
            reader_threads: Some(2),
        };
        let store = SqliteStreamStore::open_with_config(&config).await.unwrap();
        (store, temp_dir)
    }

    fn msgs(ids: &[u128]) -> Vec<NewStreamMessage> {
        ids.iter()
            .map(|id| NewStreamMessage::new(Uuid::from_u128(*id), "type", b"payload".to_vec()))
            .collect()
    }

    #[tokio::test]
    async fn test_open_and_shutdown() {
        let (store, _temp_dir) = test_store().await;
        assert_eq!(store.reader_count(), 2);
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let (store, _temp_dir) = test_store().await;
        let cancel = CancellationToken::new();
        let stream = StreamId::new("stream-1");

        let result = store
            .append_to_stream(&stream, ExpectedVersion::NoStream, msgs(&[1, 2, 3]), &cancel)
            .await
            .unwrap();
        assert_eq!(result.current_version.as_raw(), 2);

        let page = store
            .read_stream_forwards(&stream, StreamVersion::START, 10, &cancel)
            .await
            .unwrap();
        assert_eq!(page.status, PageReadStatus::Success);
        assert_eq!(page.messages.len(), 3);

        let head = store.read_head_position(&cancel).await.unwrap();
        assert_eq!(head.as_raw(), 2);

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_creates_parent_directory() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join("test.db");

        let store = SqliteStreamStore::open(&path).await.unwrap();
        assert!(path.exists());
        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let (store, _temp_dir) = test_store().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store
            .append_to_stream(&"s".into(), ExpectedVersion::Any, msgs(&[1]), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let err = store.read_head_position(&cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));

        let head = store.read_head_position(&CancellationToken::new()).await.unwrap();
        assert_eq!(head, Position::NONE);

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_operations_fail_after_shutdown() {
        let (store, _temp_dir) = test_store().await;
        let clone = store.clone();
        store.shutdown().await;

        let err = clone
            .append_to_stream(&"s".into(), ExpectedVersion::Any, msgs(&[1]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShutDown(_)));
        assert!(!err.is_wrong_expected_version());

        let err = clone.read_head_position(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::ShutDown(_)));
    }
}
