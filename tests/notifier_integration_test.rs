mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{msgs, token};
use futures::StreamExt;
use streamstore::{
    AllStreamFilter, CancellationToken, ExpectedVersion, InMemoryStreamStore, NotifierConfig,
    NotifierState, PollingNotifier, ReadonlyStreamStore, StreamId, StreamStore,
};

const INTERVAL: Duration = Duration::from_millis(20);
const WAIT: Duration = Duration::from_secs(5);

fn config() -> NotifierConfig {
    NotifierConfig::default().with_interval(INTERVAL)
}

#[tokio::test]
async fn sqlite_appends_are_announced() {
    let (_dir, _path, store) = common::open_temp_store("notify.db").await;
    let store = Arc::new(store);

    store
        .append_to_stream(&StreamId::new("before"), ExpectedVersion::NoStream, msgs(&[1]), &token())
        .await
        .unwrap();

    let notifier = PollingNotifier::with_config(store.clone(), config()).unwrap();
    let mut subscription = notifier.subscribe();
    let mut states = notifier.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == NotifierState::Polling))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notifier.head_position().map(|p| p.as_raw()), Some(0));

    store
        .append_to_stream(&StreamId::new("after"), ExpectedVersion::NoStream, msgs(&[2]), &token())
        .await
        .unwrap();

    // The first poll reads from the head, so "before" is announced too.
    let mut announced = Vec::new();
    while !announced.contains(&StreamId::new("after")) {
        let info = common::eventually(WAIT, INTERVAL, || subscription.try_recv())
            .await
            .unwrap();
        assert!(info.message_types.contains("type"));
        announced.extend(info.stream_ids);
    }
    announced.sort();
    assert_eq!(announced, vec![StreamId::new("after"), StreamId::new("before")]);

    notifier.dispose();
    assert!(subscription.recv().await.is_none());
}

#[tokio::test]
async fn every_append_is_eventually_announced_once() {
    let (_dir, _path, store) = common::open_temp_store("notify_all.db").await;
    let store = Arc::new(store);

    let notifier = PollingNotifier::with_config(store.clone(), config().with_batch_size(3)).unwrap();
    let subscription = notifier.subscribe_filtered(AllStreamFilter::with_prefixes(["tracked-"]));
    let mut states = notifier.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == NotifierState::Polling))
        .await
        .unwrap()
        .unwrap();

    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..10u128 {
                let prefix = if i % 2 == 0 { "tracked" } else { "ignored" };
                store
                    .append_to_stream(
                        &StreamId::new(format!("{prefix}-{i}")),
                        ExpectedVersion::NoStream,
                        msgs(&[i]),
                        &token(),
                    )
                    .await
                    .unwrap();
            }
        })
    };
    writer.await.unwrap();

    let mut seen = BTreeSet::new();
    let mut notifications = Box::pin(subscription.into_stream());
    while seen.len() < 5 {
        let info = tokio::time::timeout(WAIT, notifications.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        for stream in info.stream_ids {
            assert!(stream.as_str().starts_with("tracked-"));
            assert!(seen.insert(stream), "stream announced twice");
        }
    }

    assert_eq!(store.read_head_position(&token()).await.unwrap().as_raw(), 9);
    notifier.dispose();
    assert!(notifications.next().await.is_none());
}

#[tokio::test]
async fn dropping_the_notifier_ends_subscriptions() {
    let (_dir, _path, store) = common::open_temp_store("notify_drop.db").await;
    let notifier = PollingNotifier::new(Arc::new(store));
    let mut subscription = notifier.subscribe();

    drop(notifier);

    let ended = tokio::time::timeout(WAIT, subscription.recv()).await.unwrap();
    assert!(ended.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscribers_churn_while_publishing() {
    const STREAMS: u128 = 200;

    let store = Arc::new(InMemoryStreamStore::new());
    let config = NotifierConfig::default()
        .with_interval(Duration::from_millis(10))
        .with_batch_size(5);
    let notifier = Arc::new(PollingNotifier::with_config(store.clone(), config).unwrap());
    let mut held = notifier.subscribe();

    let mut states = notifier.state_changes();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == NotifierState::Polling))
        .await
        .unwrap()
        .unwrap();

    let done = CancellationToken::new();
    let mut churners = Vec::new();
    for i in 0..4 {
        let notifier = notifier.clone();
        let done = done.clone();
        churners.push(tokio::spawn(async move {
            let mut cycles = 0u64;
            while !done.is_cancelled() {
                let mut subscription = if i % 2 == 0 {
                    notifier.subscribe()
                } else {
                    notifier.subscribe_filtered(AllStreamFilter::with_prefixes(["churn-"]))
                };
                let _ = subscription.try_recv();
                tokio::task::yield_now().await;
                drop(subscription);
                cycles += 1;
            }
            cycles
        }));
    }

    let appender = {
        let store = store.clone();
        tokio::spawn(async move {
            for i in 0..STREAMS {
                store
                    .append_to_stream(
                        &StreamId::new(format!("churn-{i:03}")),
                        ExpectedVersion::NoStream,
                        msgs(&[i]),
                        &token(),
                    )
                    .await
                    .unwrap();
                if i % 10 == 0 {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        })
    };

    let mut seen = BTreeSet::new();
    let collected = tokio::time::timeout(WAIT, async {
        while seen.len() < STREAMS as usize {
            let info = held.recv().await.unwrap().unwrap();
            for stream in info.stream_ids {
                assert!(seen.insert(stream), "stream announced twice");
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "only {} of {} streams announced", seen.len(), STREAMS);

    appender.await.unwrap();
    done.cancel();
    let mut cycles = 0;
    for churner in churners {
        cycles += tokio::time::timeout(WAIT, churner).await.unwrap().unwrap();
    }
    assert!(cycles > 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(held.try_recv().is_none());
    notifier.dispose();
}
