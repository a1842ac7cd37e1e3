//! # Polling Notifier
//!
//! Turns the pull-based read model into a push-based stream of "something
//! changed" hints, without the backend needing a native change feed.
//!
//! ## State Machine
//!
//! ```text
//!                 read_head_position fails
//!                 (warn, sleep interval, retry)
//!                      ┌──────┐
//!                      ▼      │
//!   new() ──► ┌───────────────┐──┘        ┌─────────────┐
//!             │ Bootstrapping │ ─── ok ──► │   Polling   │ ◄─┐ page empty: sleep
//!             └───────┬───────┘            └──────┬──────┘ ──┘ page error: warn, sleep
//!                     │                           │        page full: publish, advance
//!                     │        dispose() / drop   │
//!                     └──────────► ┌──────────┐ ◄─┘
//!                                  │ Disposed │  (terminal)
//!                                  └──────────┘
//! ```
//!
//! ## The Continuation
//!
//! Polling holds one [`ReadAllRequest`], initially "forward from the head
//! position, `batch_size` messages, no payloads" (position 0 for an empty
//! store). The first page therefore includes the head message itself. The
//! request is only replaced by the page's
//! [`next_request`](crate::page::ReadAllPage::next_request) after a non-empty
//! page was published, so an empty or failed poll retries the same cursor:
//! no position is skipped and none is announced twice.
//!
//! ## Delivery
//!
//! Notifications are hints. Each carries the distinct stream ids and message
//! types of one polled page; appends that land within one interval coalesce
//! into one notification. Subscribers only see notifications published after
//! they subscribed, and are expected to re-read the store for the data.
//!
//! ## Rust Concepts
//!
//! - **`tokio::sync::broadcast`**: every subscriber gets every page; slow
//!   subscribers get `Error::SubscriptionLagged` instead of blocking the poller.
//! - **`CancellationToken`**: passed into every sleep and every store call, so
//!   disposal interrupts the loop wherever it is suspended.
//! - **`tokio::sync::watch`**: exposes the current [`NotifierState`].

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NotifierConfig;
use crate::error::{Error, Result};
use crate::filter::{satisfies, AllStreamFilter};
use crate::page::ReadAllRequest;
use crate::store::ReadonlyStreamStore;
use crate::types::{Position, StreamId, StreamMessage};

// =============================================================================
// Notification Types
// =============================================================================

/// The delta observed by one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationInfo {
    /// Distinct streams that received messages.
    pub stream_ids: BTreeSet<StreamId>,
    /// Distinct message types that were appended.
    pub message_types: BTreeSet<String>,
}

impl NotificationInfo {
    /// Aggregates the messages that pass `filter`. Returns `None` if none do.
    pub fn from_messages<'a, I>(messages: I, filter: Option<&AllStreamFilter>) -> Option<Self>
    where
        I: IntoIterator<Item = &'a StreamMessage>,
    {
        let mut info = Self::default();
        for message in messages {
            if satisfies(filter, message) {
                info.stream_ids.insert(message.stream_id.clone());
                info.message_types.insert(message.message_type.clone());
            }
        }
        (!info.stream_ids.is_empty()).then_some(info)
    }
}

/// Lifecycle of a [`PollingNotifier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifierState {
    /// Waiting for the store to report its head position.
    Bootstrapping,
    /// Polling the global log.
    Polling,
    /// Stopped for good.
    Disposed,
}

/// One polled page, shared by every subscriber.
type ChangeBatch = Arc<[StreamMessage]>;

type SharedSender = Arc<Mutex<Option<broadcast::Sender<ChangeBatch>>>>;

// =============================================================================
// PollingNotifier
// =============================================================================

/// Background poller that publishes a [`NotificationInfo`] whenever new
/// messages become durable.
///
/// The poll task starts in the constructor, which must therefore be called
/// from within a Tokio runtime. Dropping the notifier disposes it.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(InMemoryStreamStore::new());
/// let notifier = PollingNotifier::new(store.clone());
/// let mut subscription = notifier.subscribe();
///
/// while let Some(notification) = subscription.recv().await {
///     let info = notification?;
///     println!("changed: {:?}", info.stream_ids);
/// }
/// ```
pub struct PollingNotifier {
    sender: SharedSender,
    state_tx: Arc<watch::Sender<NotifierState>>,
    head: Arc<OnceLock<Position>>,
    cancel: CancellationToken,
}

impl PollingNotifier {
    /// Starts a notifier with the default configuration (1000ms, 50 messages).
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: ReadonlyStreamStore + ?Sized + 'static,
    {
        Self::spawn(store, NotifierConfig::default())
    }

    /// Starts a notifier with a custom configuration.
    ///
    /// # Errors
    ///
    /// `Error::InvalidArgument` if the interval is below 10ms or the batch size
    /// or channel capacity is zero.
    pub fn with_config<S>(store: Arc<S>, config: NotifierConfig) -> Result<Self>
    where
        S: ReadonlyStreamStore + ?Sized + 'static,
    {
        config.validate()?;
        Ok(Self::spawn(store, config))
    }

    fn spawn<S>(store: Arc<S>, config: NotifierConfig) -> Self
    where
        S: ReadonlyStreamStore + ?Sized + 'static,
    {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        let sender: SharedSender = Arc::new(Mutex::new(Some(sender)));
        let (state_tx, _) = watch::channel(NotifierState::Bootstrapping);
        let state_tx = Arc::new(state_tx);
        let head = Arc::new(OnceLock::new());
        let cancel = CancellationToken::new();

        let poller = Poller {
            store,
            interval: config.interval(),
            batch_size: config.batch_size,
            sender: Arc::clone(&sender),
            state_tx: Arc::clone(&state_tx),
            head: Arc::clone(&head),
            cancel: cancel.clone(),
        };
        tokio::spawn(poller.run());

        Self {
            sender,
            state_tx,
            head,
            cancel,
        }
    }

    /// Subscribes to every future notification.
    pub fn subscribe(&self) -> NotificationSubscription {
        self.subscribe_inner(None)
    }

    /// Subscribes to future notifications, counting only messages that pass
    /// `filter`. Polls where nothing passes are not delivered.
    pub fn subscribe_filtered(&self, filter: AllStreamFilter) -> NotificationSubscription {
        self.subscribe_inner(Some(filter))
    }

    fn subscribe_inner(&self, filter: Option<AllStreamFilter>) -> NotificationSubscription {
        let rx = self
            .sender
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(broadcast::Sender::subscribe));
        NotificationSubscription { rx, filter }
    }

    /// Returns the current state.
    pub fn state(&self) -> NotifierState {
        *self.state_tx.borrow()
    }

    /// Returns a receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<NotifierState> {
        self.state_tx.subscribe()
    }

    /// The head position observed at bootstrap, once known.
    ///
    /// `Some(Position::NONE)` means the store was empty.
    pub fn head_position(&self) -> Option<Position> {
        self.head.get().copied()
    }

    /// Stops polling and ends every subscription. Idempotent.
    ///
    /// Once this returns, no further notification is published.
    pub fn dispose(&self) {
        self.cancel.cancel();
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if self.state_tx.send_replace(NotifierState::Disposed) != NotifierState::Disposed {
            info!("notifier disposed");
        }
    }
}

impl Drop for PollingNotifier {
    fn drop(&mut self) {
        self.dispose();
    }
}

// =============================================================================
// Poll Loop
// =============================================================================

struct Poller<S: ?Sized> {
    store: Arc<S>,
    interval: Duration,
    batch_size: usize,
    sender: SharedSender,
    state_tx: Arc<watch::Sender<NotifierState>>,
    head: Arc<OnceLock<Position>>,
    cancel: CancellationToken,
}

impl<S> Poller<S>
where
    S: ReadonlyStreamStore + ?Sized,
{
    async fn run(self) {
        let Some(head) = self.bootstrap().await else {
            return;
        };

        let _ = self.head.set(head);
        self.set_state(NotifierState::Polling);
        info!(head_position = %head, "notifier polling");

        let mut next = ReadAllRequest::forwards(head.max(Position::START), self.batch_size)
            .with_prefetch(false);

        while !self.cancel.is_cancelled() {
            match next.execute(self.store.as_ref(), &self.cancel).await {
                Ok(page) if !page.messages.is_empty() => {
                    let following = page.next_request();
                    let count = page.messages.len();
                    if !self.publish(page.messages.into()) {
                        break;
                    }
                    debug!(
                        from = %next.from_position,
                        next = %following.from_position,
                        count,
                        "published notification"
                    );
                    next = following;
                }
                Ok(_) => {
                    if !self.pause().await {
                        break;
                    }
                }
                Err(Error::Cancelled) => break,
                Err(e) => {
                    warn!(
                        head_position = %head,
                        from = %next.from_position,
                        error = %e,
                        "failed to poll stream store"
                    );
                    if !self.pause().await {
                        break;
                    }
                }
            }
        }
    }

    /// Retries until the store reports a head. `None` once cancelled.
    async fn bootstrap(&self) -> Option<Position> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.store.read_head_position(&self.cancel).await {
                Ok(head) => return Some(head),
                Err(Error::Cancelled) => return None,
                Err(e) => {
                    warn!(error = %e, "failed to read head position, retrying");
                    if !self.pause().await {
                        return None;
                    }
                }
            }
        }
    }

    /// Sends one page to the subscribers. Returns false once disposed.
    fn publish(&self, batch: ChangeBatch) -> bool {
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(sender) => {
                // An error only means nobody is subscribed right now.
                let _ = sender.send(batch);
                true
            }
            None => false,
        }
    }

    /// Sleeps one interval. Returns false if cancelled first.
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }

    fn set_state(&self, state: NotifierState) {
        self.state_tx.send_if_modified(|current| {
            if *current == NotifierState::Disposed || *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// A live subscription to a [`PollingNotifier`]. Dropping it unsubscribes.
pub struct NotificationSubscription {
    rx: Option<broadcast::Receiver<ChangeBatch>>,
    filter: Option<AllStreamFilter>,
}

impl NotificationSubscription {
    /// Waits for the next notification.
    ///
    /// Returns `None` once the notifier is disposed, and
    /// `Some(Err(Error::SubscriptionLagged(n)))` if `n` pages were missed.
    pub async fn recv(&mut self) -> Option<Result<NotificationInfo>> {
        let filter = self.filter.as_ref();
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(batch) => {
                    if let Some(info) = NotificationInfo::from_messages(batch.iter(), filter) {
                        return Some(Ok(info));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    return Some(Err(Error::SubscriptionLagged(skipped)));
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Returns a notification that is already waiting, without blocking.
    ///
    /// `None` means nothing is pending (or the notifier is gone).
    pub fn try_recv(&mut self) -> Option<Result<NotificationInfo>> {
        let filter = self.filter.as_ref();
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(batch) => {
                    if let Some(info) = NotificationInfo::from_messages(batch.iter(), filter) {
                        return Some(Ok(info));
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    return Some(Err(Error::SubscriptionLagged(skipped)));
                }
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Converts the subscription into a `Stream` of notifications.
    pub fn into_stream(self) -> impl Stream<Item = Result<NotificationInfo>> {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|notification| (notification, subscription))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use futures::StreamExt;
    use uuid::Uuid;

    use super::*;
    use crate::filter::MessageTypeFilter;
    use crate::memory::InMemoryStreamStore;
    use crate::page::{ReadAllPage, ReadStreamPage};
    use crate::store::StreamStore;
    use crate::types::{ExpectedVersion, NewStreamMessage, StreamVersion};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn config() -> NotifierConfig {
        NotifierConfig::default().with_interval(INTERVAL)
    }

    async fn append(store: &InMemoryStreamStore, stream: &str, message_type: &str) {
        store
            .append_to_stream(
                &stream.into(),
                ExpectedVersion::Any,
                vec![NewStreamMessage::new(Uuid::new_v4(), message_type, b"{}".to_vec())],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
    }

    async fn wait_for_polling(notifier: &PollingNotifier) {
        let mut states = notifier.state_changes();
        states
            .wait_for(|state| *state == NotifierState::Polling)
            .await
            .unwrap();
    }

    fn set<const N: usize>(items: [&str; N]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn ids<const N: usize>(items: [&str; N]) -> BTreeSet<StreamId> {
        items.iter().map(|s| StreamId::new(*s)).collect()
    }

    /// Fails the first `failures` calls of each read before delegating.
    struct FlakyStore {
        inner: InMemoryStreamStore,
        head_failures: AtomicUsize,
        read_failures: AtomicUsize,
        reads: AtomicUsize,
    }

    impl FlakyStore {
        fn new(head_failures: usize, read_failures: usize) -> Self {
            Self {
                inner: InMemoryStreamStore::new(),
                head_failures: AtomicUsize::new(head_failures),
                read_failures: AtomicUsize::new(read_failures),
                reads: AtomicUsize::new(0),
            }
        }

        fn fail(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl ReadonlyStreamStore for FlakyStore {
        async fn read_stream_forwards(
            &self,
            stream_id: &StreamId,
            from_version: StreamVersion,
            max_count: usize,
            cancel: &CancellationToken,
        ) -> Result<ReadStreamPage> {
            self.inner.read_stream_forwards(stream_id, from_version, max_count, cancel).await
        }

        async fn read_stream_backwards(
            &self,
            stream_id: &StreamId,
            from_version: StreamVersion,
            max_count: usize,
            cancel: &CancellationToken,
        ) -> Result<ReadStreamPage> {
            self.inner.read_stream_backwards(stream_id, from_version, max_count, cancel).await
        }

        async fn read_all_forwards(
            &self,
            from_position: Position,
            max_count: usize,
            prefetch: bool,
            filter: Option<&AllStreamFilter>,
            cancel: &CancellationToken,
        ) -> Result<ReadAllPage> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if Self::fail(&self.read_failures) {
                return Err(Error::Internal("simulated read failure".to_string()));
            }
            self.inner
                .read_all_forwards(from_position, max_count, prefetch, filter, cancel)
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
            self.inner
                .read_all_backwards(from_position, max_count, prefetch, filter, cancel)
                .await
        }

        async fn read_head_position(&self, cancel: &CancellationToken) -> Result<Position> {
            if Self::fail(&self.head_failures) {
                return Err(Error::Internal("simulated head failure".to_string()));
            }
            self.inner.read_head_position(cancel).await
        }
    }

    #[test]
    fn test_notification_info_aggregates() {
        let message = |stream: &str, message_type: &str| StreamMessage {
            stream_id: StreamId::new(stream),
            message_id: crate::types::MessageId::new(),
            stream_version: StreamVersion::START,
            position: Position::START,
            created_at: chrono::Utc::now(),
            message_type: message_type.to_string(),
            data: None,
            metadata: None,
        };
        let messages = vec![
            message("order-1", "Created"),
            message("order-1", "Shipped"),
            message("invoice-1", "Created"),
        ];

        let info = NotificationInfo::from_messages(&messages, None).unwrap();
        assert_eq!(info.stream_ids, ids(["invoice-1", "order-1"]));
        assert_eq!(info.message_types, set(["Created", "Shipped"]));

        let filter = AllStreamFilter::builder()
            .message_types(MessageTypeFilter::matching(["Shipped"]))
            .build();
        let info = NotificationInfo::from_messages(&messages, Some(&filter)).unwrap();
        assert_eq!(info.stream_ids, ids(["order-1"]));
        assert_eq!(info.message_types, set(["Shipped"]));

        let nothing = AllStreamFilter::with_prefixes(["customer-"]);
        assert!(NotificationInfo::from_messages(&messages, Some(&nothing)).is_none());
    }

    #[tokio::test]
    async fn test_rejects_short_interval() {
        let store = Arc::new(InMemoryStreamStore::new());
        let config = NotifierConfig::default().with_interval(Duration::from_millis(9));
        let err = PollingNotifier::with_config(store, config).err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_appends_within_interval_coalesce() {
        let store = Arc::new(InMemoryStreamStore::new());
        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let mut subscription = notifier.subscribe();
        wait_for_polling(&notifier).await;

        append(&store, "stream-1", "Created").await;
        append(&store, "stream-2", "Updated").await;

        let info = subscription.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["stream-1", "stream-2"]));
        assert_eq!(info.message_types, set(["Created", "Updated"]));

        // Nothing else is pending.
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_poll_starts_at_head() {
        let store = Arc::new(InMemoryStreamStore::new());
        append(&store, "old-1", "Created").await;
        append(&store, "old-2", "Updated").await;

        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let mut subscription = notifier.subscribe();
        wait_for_polling(&notifier).await;
        assert_eq!(notifier.head_position(), Some(Position::from_raw(1)));

        // The head message is announced; earlier messages are not.
        let info = subscription.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["old-2"]));
        assert_eq!(info.message_types, set(["Updated"]));

        append(&store, "new-1", "Created").await;

        let info = subscription.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["new-1"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_existing_message_announced() {
        let store = Arc::new(InMemoryStreamStore::new());
        append(&store, "only", "Created").await;

        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let mut subscription = notifier.subscribe();
        wait_for_polling(&notifier).await;
        assert_eq!(notifier.head_position(), Some(Position::START));

        tokio::time::sleep(INTERVAL * 5).await;
        let info = subscription.try_recv().unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["only"]));
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_filtered_subscription() {
        let store = Arc::new(InMemoryStreamStore::new());
        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let mut everything = notifier.subscribe();
        let mut orders = notifier.subscribe_filtered(AllStreamFilter::with_prefixes(["order-"]));
        wait_for_polling(&notifier).await;

        append(&store, "invoice-5", "Issued").await;
        let info = everything.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["invoice-5"]));

        append(&store, "order-123", "Created").await;
        let info = everything.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["order-123"]));

        // The invoice-only page was skipped for the filtered subscriber.
        let info = orders.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["order-123"]));
        assert_eq!(info.message_types, set(["Created"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_retried_without_skipping() {
        let store = Arc::new(FlakyStore::new(2, 3));
        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let mut subscription = notifier.subscribe();

        wait_for_polling(&notifier).await;
        assert_eq!(notifier.head_position(), Some(Position::NONE));

        append(&store.inner, "stream-1", "Created").await;

        let info = subscription.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["stream-1"]));
        assert!(store.reads.load(Ordering::SeqCst) >= 4);

        tokio::time::sleep(INTERVAL * 3).await;
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_subscriber_lags() {
        let store = Arc::new(InMemoryStreamStore::new());
        let config = NotifierConfig {
            channel_capacity: 1,
            ..config()
        };
        let notifier = PollingNotifier::with_config(store.clone(), config).unwrap();
        let mut subscription = notifier.subscribe();
        wait_for_polling(&notifier).await;

        append(&store, "stream-1", "First").await;
        tokio::time::sleep(INTERVAL * 2).await;
        append(&store, "stream-2", "Second").await;
        tokio::time::sleep(INTERVAL * 2).await;

        let lagged = subscription.recv().await.unwrap();
        assert!(matches!(lagged, Err(Error::SubscriptionLagged(1))));

        let info = subscription.recv().await.unwrap().unwrap();
        assert_eq!(info.stream_ids, ids(["stream-2"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_ends_subscriptions() {
        let store = Arc::new(InMemoryStreamStore::new());
        let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
        let subscription = notifier.subscribe();
        wait_for_polling(&notifier).await;

        notifier.dispose();
        notifier.dispose();
        assert_eq!(notifier.state(), NotifierState::Disposed);

        let collected: Vec<_> = subscription.into_stream().collect().await;
        assert!(collected.is_empty());

        let mut late = notifier.subscribe();
        assert!(late.recv().await.is_none());

        // Appends after disposal are never announced.
        append(&store, "stream-1", "Created").await;
        tokio::time::sleep(INTERVAL * 3).await;
        assert!(late.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_bootstrap() {
        let store = Arc::new(FlakyStore::new(usize::MAX, 0));
        let notifier = PollingNotifier::with_config(store, config()).unwrap();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(notifier.state(), NotifierState::Bootstrapping);

        notifier.dispose();
        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(notifier.state(), NotifierState::Disposed);
        assert_eq!(notifier.head_position(), None);
    }
}
