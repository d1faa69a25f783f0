mod common;

use common::{eventually, memory_producer, test_builder};
use kafka_proxy::{
    DeliveryError, ErrorKind, MemoryAdapter, Message, RecordingTerminator, State,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[tokio::test]
async fn test_pipeline_end_to_end() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::new());
    let producer = memory_producer(&adapter, &terminator);
    let mut successes = producer.successes().expect("successes available");

    let input = producer.input().unwrap();
    for i in 0..100 {
        let key = if i % 2 == 0 { "even" } else { "" };
        let message = producer.create_key_message("events", key, format!("event-{i}"));
        input.send(message).await.unwrap();
    }
    drop(input);

    let mut acknowledged = 0;
    while acknowledged < 100 {
        let delivery = successes.recv().await.unwrap();
        assert_eq!(delivery.offset, acknowledged);
        acknowledged += 1;
    }

    assert!(producer.close().recv().await.is_none());
    assert!(producer.is_closed());
    assert!(successes.recv().await.is_none());

    let delivered = adapter.delivered();
    assert_eq!(delivered.len(), 100);
    assert_eq!(delivered[0].key(), Some("even"));
    assert_eq!(delivered[1].key(), None);
    assert_eq!(terminator.count(), 0);
}

#[tokio::test]
async fn test_buffered_messages_survive_close() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::with_capacity(16));
    let producer = memory_producer(&adapter, &terminator);

    let input = producer.input().unwrap();
    for i in 0..16 {
        input.send(Message::new("events", format!("{i}"))).await.unwrap();
    }

    assert!(producer.close().recv().await.is_none());
    assert_eq!(adapter.delivered().len(), 16);

    // The sink handed out before close is now disconnected
    assert!(input.send(Message::new("events", "late")).await.is_err());
    let err = producer.input().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceClosedAccess);
}

#[tokio::test]
async fn test_handler_sees_each_error_once() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let producer = test_builder(&terminator)
        .error_handler(move |err: DeliveryError| sink.lock().unwrap().push(err))
        .build(Arc::clone(&adapter))
        .unwrap();

    producer.send(Message::new("", "no topic")).await.unwrap();
    eventually(|| seen.lock().unwrap().len() == 1).await;

    assert!(adapter.inject_error(DeliveryError::new(
        Message::new("events", "x"),
        "Broker: Request timed out",
    )));
    eventually(|| seen.lock().unwrap().len() == 2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].reason, "message topic is empty");
    assert_eq!(seen[1].reason, "Broker: Request timed out");
    assert_eq!(terminator.count(), 0);
}

#[tokio::test]
async fn test_enabling_logging_switches_to_fail_fast() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::new());
    let calls = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&calls);

    let producer = test_builder(&terminator)
        .error_handler(move |_| *counter.lock().unwrap() += 1)
        .build(Arc::clone(&adapter))
        .unwrap();

    adapter.inject_error(DeliveryError::new(Message::new("events", "1"), "first"));
    eventually(|| *calls.lock().unwrap() == 1).await;

    producer.enable_logging();
    adapter.inject_error(DeliveryError::new(Message::new("events", "2"), "second"));
    eventually(|| terminator.count() == 1).await;

    assert_eq!(*calls.lock().unwrap(), 1);
    assert!(terminator.reasons()[0].contains("second"));
}

#[tokio::test]
async fn test_shutdown_signal_closes_producer() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::new());
    let (fire, signal) = oneshot::channel::<()>();

    let producer = common::test_builder(&terminator)
        .shutdown_signal(async move {
            let _ = signal.await;
        })
        .build(Arc::clone(&adapter))
        .unwrap();

    producer.send(Message::new("events", "before signal")).await.unwrap();
    fire.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(5), producer.closed())
        .await
        .unwrap();
    assert_eq!(producer.state(), State::Closed);
    assert_eq!(adapter.close_calls(), 1);
    assert_eq!(adapter.delivered().len(), 1);

    // A user close racing the signal is a no-op
    assert!(producer.close().recv().await.is_none());
    assert_eq!(adapter.close_calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_races_with_signal_and_user() {
    let terminator = RecordingTerminator::new();
    let adapter = Arc::new(MemoryAdapter::new().with_close_delay(Duration::from_millis(30)));
    let (fire, signal) = oneshot::channel::<()>();

    let producer = common::test_builder(&terminator)
        .shutdown_signal(async move {
            let _ = signal.await;
        })
        .build(Arc::clone(&adapter))
        .unwrap();

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let producer = producer.clone();
            tokio::spawn(async move { producer.close().recv().await })
        })
        .collect();
    fire.send(()).unwrap();

    for closer in closers {
        assert!(closer.await.unwrap().is_none());
    }
    tokio::time::timeout(Duration::from_secs(5), producer.closed())
        .await
        .unwrap();

    assert_eq!(adapter.close_calls(), 1);
    assert_eq!(terminator.count(), 0);
}
