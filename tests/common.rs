#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use streamstore::{
    CancellationToken, Database, NewStreamMessage, SqliteStreamStore, StorageConfig,
};
use uuid::Uuid;

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub async fn open_temp_store(name: &str) -> (tempfile::TempDir, PathBuf, SqliteStreamStore) {
    let (dir, path) = create_temp_db_file(name);
    let config = StorageConfig {
        reader_threads: Some(2),
        ..StorageConfig::with_path(&path)
    };
    let store = SqliteStreamStore::open_with_config(&config)
        .await
        .expect("open sqlite store");
    (dir, path, store)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn open_read_write(path: &Path) -> Connection {
    Connection::open(path).expect("open read-write connection")
}

/// Message with a deterministic id derived from `n`.
pub fn msg(n: u128) -> NewStreamMessage {
    NewStreamMessage::new(
        Uuid::from_u128(n),
        "type",
        format!("{{\"n\":{n}}}").into_bytes(),
    )
}

pub fn msgs(ids: &[u128]) -> Vec<NewStreamMessage> {
    ids.iter().map(|n| msg(*n)).collect()
}

pub fn token() -> CancellationToken {
    CancellationToken::new()
}

pub async fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = std::time::Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(interval).await;
    }
}
