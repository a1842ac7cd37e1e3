//! # Store Contracts
//!
//! The consumer-facing traits every backend implements. Code that only reads
//! (the notifier, projections, subscribers) depends on [`ReadonlyStreamStore`];
//! writers depend on [`StreamStore`].
//!
//! ## Rust Pattern: async_trait
//!
//! Both traits are used as `dyn` objects and behind `Arc<S>` generics, so their
//! async methods are declared through `#[async_trait]`, which boxes the
//! returned futures and keeps the traits object-safe.
//!
//! ## Cancellation
//!
//! Every operation takes a `&CancellationToken`. A token that is already
//! cancelled, or becomes cancelled before the backend replies, yields
//! `Error::Cancelled`. For appends the token is checked before the write
//! starts: a cancelled append either never starts or completes atomically.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::filter::AllStreamFilter;
use crate::page::{PageReadStatus, ReadAllPage, ReadStreamPage};
use crate::types::{
    AppendResult, ExpectedVersion, NewStreamMessage, Position, StreamId, StreamMessage,
    StreamVersion,
};

/// Read operations over streams and the global log.
#[async_trait]
pub trait ReadonlyStreamStore: Send + Sync {
    /// Reads up to `max_count` messages of a stream in ascending version order,
    /// starting at `from_version` (inclusive).
    ///
    /// A missing stream yields a page with status `StreamNotFound`.
    async fn read_stream_forwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage>;

    /// Reads up to `max_count` messages of a stream in descending version
    /// order, starting at `from_version`. Use `StreamVersion::END` for the head.
    async fn read_stream_backwards(
        &self,
        stream_id: &StreamId,
        from_version: StreamVersion,
        max_count: usize,
        cancel: &CancellationToken,
    ) -> Result<ReadStreamPage>;

    /// Reads up to `max_count` messages of the global log in ascending
    /// position order, starting at `from_position` (inclusive).
    async fn read_all_forwards(
        &self,
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        cancel: &CancellationToken,
    ) -> Result<ReadAllPage>;

    /// Reads up to `max_count` messages of the global log in descending
    /// position order. Use `Position::END` for the head.
    async fn read_all_backwards(
        &self,
        from_position: Position,
        max_count: usize,
        prefetch: bool,
        filter: Option<&AllStreamFilter>,
        cancel: &CancellationToken,
    ) -> Result<ReadAllPage>;

    /// Returns the greatest committed position, or `Position::NONE` for an
    /// empty store.
    async fn read_head_position(&self, cancel: &CancellationToken) -> Result<Position>;
}

/// Read operations plus the append.
#[async_trait]
pub trait StreamStore: ReadonlyStreamStore {
    /// Appends a batch to a stream under an expected-version precondition.
    ///
    /// Retrying a batch that is already durable returns the stream's current
    /// tail instead of writing twice. See [`crate::append`] for the rules.
    async fn append_to_stream(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
        cancel: &CancellationToken,
    ) -> Result<AppendResult>;
}

/// Fails fast on a token that is already cancelled.
pub(crate) fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

impl StreamMessage {
    /// Returns the payload, fetching it from `store` if this message was read
    /// without prefetch.
    pub async fn load_data<S>(&self, store: &S, cancel: &CancellationToken) -> Result<Vec<u8>>
    where
        S: ReadonlyStreamStore + ?Sized,
    {
        if let Some(data) = &self.data {
            return Ok(data.clone());
        }

        let page = store
            .read_stream_forwards(&self.stream_id, self.stream_version, 1, cancel)
            .await?;

        if page.status == PageReadStatus::StreamNotFound {
            return Err(Error::InvalidArgument(format!(
                "stream '{}' does not exist",
                self.stream_id
            )));
        }

        page.messages
            .into_iter()
            .next()
            .filter(|message| message.message_id == self.message_id)
            .and_then(|message| message.data)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "message {} not found at version {} of stream '{}'",
                    self.message_id, self.stream_version, self.stream_id
                ))
            })
    }
}
