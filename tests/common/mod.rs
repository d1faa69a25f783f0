use kafka_proxy::{KafkaConfig, MemoryAdapter, Producer, ProducerBuilder, RecordingTerminator};
use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Broker list for tests, from `TEST_KAFKA_BROKERS` or localhost.
pub fn test_kafka_config() -> KafkaConfig {
    KafkaConfig::new(
        env::var("TEST_KAFKA_BROKERS")
            .unwrap_or_else(|_| "localhost:9092".to_string())
            .split(',')
            .map(|s| s.trim().to_string()),
    )
}

/// Builder with signal watching disabled and terminations recorded.
pub fn test_builder(terminator: &Arc<RecordingTerminator>) -> ProducerBuilder {
    Producer::builder(test_kafka_config())
        .without_signal_watch()
        .terminator(terminator.clone())
}

pub fn memory_producer(adapter: &Arc<MemoryAdapter>, terminator: &Arc<RecordingTerminator>) -> Producer {
    test_builder(terminator)
        .build(Arc::clone(adapter))
        .expect("valid brokers")
}

/// Waits for `condition` to hold, failing the test after five seconds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}
