//! Signal-triggered shutdown of a producer.
//!
//! ## Unix
//! **SIGINT**, **SIGTERM** and **SIGQUIT** are handled.
//!
//! ## Windows
//! Only [`tokio::signal::ctrl_c`] is awaited.

use crate::producer::{Producer, WeakProducer};
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Process termination signals, registered eagerly so that a signal sent
/// right after construction is not missed.
pub struct ShutdownSignals {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigquit: tokio::signal::unix::Signal,
}

impl ShutdownSignals {
    /// Registers interest in the termination signals. Must be called inside
    /// a tokio runtime.
    #[cfg(unix)]
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sigquit: signal(SignalKind::quit())?,
        })
    }

    #[cfg(not(unix))]
    pub fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Completes when the first termination signal arrives.
    #[cfg(unix)]
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.sigint.recv() => debug!("SIGINT received"),
            _ = self.sigterm.recv() => debug!("SIGTERM received"),
            _ = self.sigquit.recv() => debug!("SIGQUIT received"),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(self) {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Closes a producer once a shutdown signal arrives.
pub struct SignalWatcher;

impl SignalWatcher {
    /// Spawns the watcher. It holds only a weak reference to `producer`.
    ///
    /// On the signal the producer is closed; a reported close error ends the
    /// process through the producer's terminator. The error is escalated only
    /// once, so with logging enabled the close sequence does it.
    pub fn spawn<F>(producer: &Producer, signal: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let target = producer.downgrade();
        tokio::spawn(watch(target, signal))
    }
}

async fn watch<F>(target: WeakProducer, signal: F)
where
    F: Future<Output = ()>,
{
    signal.await;
    info!("Keyboard-Interrupt signal received.");

    let Some(producer) = target.upgrade() else {
        debug!("Producer already dropped, nothing to close");
        return;
    };

    match producer.close().recv().await {
        // With logging on the close sequence has already escalated the error
        Some(err) if producer.is_logging_enabled() => {
            debug!("Close error already escalated: {}", err);
        }
        Some(err) => producer.terminate(&err.to_string()),
        None => {
            producer.closed().await;
            info!("Producer closed after shutdown signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapter;
    use crate::config::KafkaConfig;
    use crate::policy::RecordingTerminator;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn config() -> KafkaConfig {
        KafkaConfig::new(["localhost:9092"])
    }

    #[tokio::test]
    async fn test_signal_closes_producer() {
        let (fire, signal) = oneshot::channel::<()>();
        let terminator = RecordingTerminator::new();
        let adapter = Arc::new(MemoryAdapter::new());

        let producer = Producer::builder(config())
            .terminator(terminator.clone())
            .shutdown_signal(async move {
                let _ = signal.await;
            })
            .build(Arc::clone(&adapter))
            .unwrap();

        assert!(!producer.is_closed());
        fire.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), producer.closed())
            .await
            .unwrap();
        assert!(producer.is_closed());
        assert_eq!(adapter.close_calls(), 1);
        assert_eq!(terminator.count(), 0);
    }

    #[tokio::test]
    async fn test_signal_with_close_failure_terminates() {
        let (fire, signal) = oneshot::channel::<()>();
        let terminator = RecordingTerminator::new();

        let producer = Producer::builder(config())
            .terminator(terminator.clone())
            .without_signal_watch()
            .build(MemoryAdapter::new().with_close_failure("broker gone"))
            .unwrap();
        let watcher = SignalWatcher::spawn(&producer, async move {
            let _ = signal.await;
        });

        fire.send(()).unwrap();
        watcher.await.unwrap();

        let reasons = terminator.reasons();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("broker gone"));
        tokio::time::timeout(Duration::from_secs(5), producer.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_failure_with_logging_terminates_once() {
        let (fire, signal) = oneshot::channel::<()>();
        let terminator = RecordingTerminator::new();

        let producer = Producer::builder(config())
            .terminator(terminator.clone())
            .without_signal_watch()
            .build(MemoryAdapter::new().with_close_failure("broker gone"))
            .unwrap();
        producer.enable_logging();
        let watcher = SignalWatcher::spawn(&producer, async move {
            let _ = signal.await;
        });

        fire.send(()).unwrap();
        watcher.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), producer.closed())
            .await
            .unwrap();

        assert_eq!(terminator.count(), 1);
        let reasons = terminator.reasons();
        assert!(reasons[0].contains("Error 3: Error closing async producer"));
        assert!(reasons[0].contains("broker gone"));
    }

    #[tokio::test]
    async fn test_signal_after_close_is_harmless() {
        let (fire, signal) = oneshot::channel::<()>();
        let terminator = RecordingTerminator::new();
        let adapter = Arc::new(MemoryAdapter::new());

        let producer = Producer::builder(config())
            .terminator(terminator.clone())
            .without_signal_watch()
            .build(Arc::clone(&adapter))
            .unwrap();
        let watcher = SignalWatcher::spawn(&producer, async move {
            let _ = signal.await;
        });

        assert!(producer.close().recv().await.is_none());
        fire.send(()).unwrap();
        watcher.await.unwrap();

        assert_eq!(adapter.close_calls(), 1);
        assert_eq!(terminator.count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_producer_is_not_kept_alive() {
        let (fire, signal) = oneshot::channel::<()>();
        let producer = Producer::builder(config())
            .without_signal_watch()
            .build(MemoryAdapter::new())
            .unwrap();
        let watcher = SignalWatcher::spawn(&producer, async move {
            let _ = signal.await;
        });

        drop(producer);
        fire.send(()).unwrap();
        watcher.await.unwrap();
    }
}
