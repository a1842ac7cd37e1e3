//! # Append Engine
//!
//! Appends a batch to a stream under an expected-version precondition, telling
//! a harmless retry apart from a real conflict.
//!
//! ## The Backend Primitive
//!
//! The engine never talks to SQLite or to a `HashMap` directly. It runs against
//! a [`StreamLedger`]: a view of the durable state that the backend has already
//! made exclusive (a SQLite transaction on the writer thread, or a held mutex).
//! Because the decision is made *before* [`StreamLedger::write`] is called, a
//! rejected append never touches versions or positions.
//!
//! ```text
//! append_to_stream(stream, expected, batch)
//!         │
//!         ▼
//! ┌───────────────────┐   head / ids / lookups   ┌──────────────┐
//! │   reconcile_*     │ ───────────────────────► │ StreamLedger │
//! │ (pure decision)   │                          │  (backend)   │
//! └────────┬──────────┘                          └──────▲───────┘
//!          │ Commit / AlreadyCommitted / Conflict       │ write
//!          └────────────────────────────────────────────┘
//! ```
//!
//! ## Reconciliation Rules
//!
//! | Expected | Stream state | Outcome |
//! |----------|--------------|---------|
//! | `NoStream` | missing | commit from version 0 |
//! | `NoStream` | exists | batch equals (or prefixes) versions `0..` ⇒ no-op, else conflict |
//! | `Exact(v)` | head == v | commit, unless an id is already in the stream ⇒ conflict |
//! | `Exact(v)` | head > v | batch equals (or prefixes) versions `v+1..` ⇒ no-op, else conflict |
//! | `Exact(v)` | missing, or head < v | conflict |
//! | `Any` | missing | commit from version 0 |
//! | `Any` | exists | anchored on the first id: in-stream run ⇒ no-op; unseen ids ⇒ commit; otherwise conflict |
//!
//! A no-op returns the stream's current tail. A batch that re-sends a committed
//! run and then continues past the stream's end is a conflict in every mode.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::types::{
    AppendResult, ExpectedVersion, MessageId, NewStreamMessage, StreamHead, StreamId,
    StreamVersion,
};

// =============================================================================
// Backend Primitive
// =============================================================================

/// Exclusive access to a backend's durable stream state for one append.
///
/// Implementations must make every method observe the same snapshot, and
/// must make [`write`](StreamLedger::write) atomic with the reads that led to it.
pub trait StreamLedger {
    /// Returns the head of the stream, or `None` if it does not exist.
    fn stream_head(&mut self, stream_id: &StreamId) -> Result<Option<StreamHead>>;

    /// Returns up to `count` message ids starting at version `from`, in version order.
    fn message_ids(
        &mut self,
        stream_id: &StreamId,
        from: StreamVersion,
        count: usize,
    ) -> Result<Vec<MessageId>>;

    /// Returns the version holding `message_id` in this stream, if any.
    fn find_version(
        &mut self,
        stream_id: &StreamId,
        message_id: &MessageId,
    ) -> Result<Option<StreamVersion>>;

    /// Creates the stream if `head` is `None`, then appends `messages` after
    /// the head, assigning consecutive versions and global positions.
    ///
    /// Returns the new head.
    fn write(
        &mut self,
        stream_id: &StreamId,
        head: Option<StreamHead>,
        messages: &[NewStreamMessage],
    ) -> Result<StreamHead>;
}

// =============================================================================
// Engine
// =============================================================================

/// What the engine decided for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    /// Write the whole batch after the current head.
    Commit,
    /// The batch is already durable; report this head.
    AlreadyCommitted(StreamHead),
    /// Reject with `WrongExpectedVersion`.
    Conflict,
}

/// Appends `messages` to `stream_id` through `ledger`.
///
/// # Errors
///
/// - `Error::WrongExpectedVersion` if the precondition fails or a retry diverges
/// - `Error::InvalidArgument` for an invalid stream id, a repeated message id
///   inside the batch, or an exact version below `-1`
/// - Any backend error returned by the ledger
pub fn append_to_stream<L>(
    ledger: &mut L,
    stream_id: &StreamId,
    expected: ExpectedVersion,
    messages: &[NewStreamMessage],
) -> Result<AppendResult>
where
    L: StreamLedger + ?Sized,
{
    validate(stream_id, expected, messages)?;

    let head = ledger.stream_head(stream_id)?;

    let decision = match expected {
        ExpectedVersion::NoStream => reconcile_no_stream(ledger, stream_id, head, messages)?,
        ExpectedVersion::Any => reconcile_any(ledger, stream_id, head, messages)?,
        ExpectedVersion::Exact(version) => {
            reconcile_exact(ledger, stream_id, head, version, messages)?
        }
    };

    match decision {
        Decision::Commit => {
            let new_head = ledger.write(stream_id, head, messages)?;
            debug!(
                stream_id = %stream_id,
                expected = %expected,
                count = messages.len(),
                version = %new_head.version,
                position = %new_head.position,
                "appended messages"
            );
            Ok(new_head.into())
        }
        Decision::AlreadyCommitted(head) => {
            debug!(
                stream_id = %stream_id,
                expected = %expected,
                count = messages.len(),
                "append already committed, returning current tail"
            );
            Ok(head.into())
        }
        Decision::Conflict => Err(Error::wrong_expected_version(stream_id.as_str(), expected)),
    }
}

fn validate(
    stream_id: &StreamId,
    expected: ExpectedVersion,
    messages: &[NewStreamMessage],
) -> Result<()> {
    stream_id.validate()?;

    if let ExpectedVersion::Exact(version) = expected {
        if version < StreamVersion::NONE {
            return Err(Error::InvalidArgument(format!(
                "expected version {} is below -1",
                version
            )));
        }
    }

    let mut seen = HashSet::with_capacity(messages.len());
    for message in messages {
        if !seen.insert(message.message_id) {
            return Err(Error::InvalidArgument(format!(
                "message id {} appears more than once in the batch",
                message.message_id
            )));
        }
    }

    Ok(())
}

/// `NoStream`: the batch must be the stream's opening run.
fn reconcile_no_stream<L: StreamLedger + ?Sized>(
    ledger: &mut L,
    stream_id: &StreamId,
    head: Option<StreamHead>,
    messages: &[NewStreamMessage],
) -> Result<Decision> {
    let Some(head) = head else {
        return Ok(Decision::Commit);
    };

    matches_committed_run(ledger, stream_id, head, StreamVersion::START, messages)
}

/// `Exact(v)`: the head must be `v`, or the batch must already sit right after `v`.
fn reconcile_exact<L: StreamLedger + ?Sized>(
    ledger: &mut L,
    stream_id: &StreamId,
    head: Option<StreamHead>,
    expected: StreamVersion,
    messages: &[NewStreamMessage],
) -> Result<Decision> {
    let Some(head) = head else {
        return Ok(Decision::Conflict);
    };

    if head.version == expected {
        if messages.is_empty() {
            return Ok(Decision::AlreadyCommitted(head));
        }
        // Duplicate ids against a matching head mean the caller lost track.
        for message in messages {
            if ledger.find_version(stream_id, &message.message_id)?.is_some() {
                return Ok(Decision::Conflict);
            }
        }
        return Ok(Decision::Commit);
    }

    if head.version > expected && !messages.is_empty() {
        return matches_committed_run(ledger, stream_id, head, expected.next(), messages);
    }

    Ok(Decision::Conflict)
}

/// `Any`: anchor on the first message id wherever it sits in the stream.
fn reconcile_any<L: StreamLedger + ?Sized>(
    ledger: &mut L,
    stream_id: &StreamId,
    head: Option<StreamHead>,
    messages: &[NewStreamMessage],
) -> Result<Decision> {
    let Some(head) = head else {
        return Ok(Decision::Commit);
    };

    let Some(first) = messages.first() else {
        return Ok(Decision::AlreadyCommitted(head));
    };

    if let Some(anchor) = ledger.find_version(stream_id, &first.message_id)? {
        return matches_committed_run(ledger, stream_id, head, anchor, messages);
    }

    // First id is new: every other id must be new as well.
    for message in &messages[1..] {
        if ledger.find_version(stream_id, &message.message_id)?.is_some() {
            return Ok(Decision::Conflict);
        }
    }

    Ok(Decision::Commit)
}

/// Compares the batch against the committed ids starting at `from`.
///
/// The whole batch must fit inside the stream; a batch that runs past the
/// current head is a conflict, never a partial commit.
fn matches_committed_run<L: StreamLedger + ?Sized>(
    ledger: &mut L,
    stream_id: &StreamId,
    head: StreamHead,
    from: StreamVersion,
    messages: &[NewStreamMessage],
) -> Result<Decision> {
    let last_needed = from.add(messages.len() as i64 - 1);
    if last_needed > head.version {
        return Ok(Decision::Conflict);
    }

    let committed = ledger.message_ids(stream_id, from, messages.len())?;
    let same_run = committed.len() == messages.len()
        && committed
            .iter()
            .zip(messages)
            .all(|(id, message)| *id == message.message_id);

    if same_run {
        Ok(Decision::AlreadyCommitted(head))
    } else {
        Ok(Decision::Conflict)
    }
}

// =============================================================================
// Tests
// =============================================================================
