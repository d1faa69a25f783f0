//! The producer handle: gates access to an [`Adapter`] and owns its close
//! sequence.
//!
//! Construction spawns two background tasks. The error router drains the
//! adapter's delivery errors, and the signal watcher closes the producer on
//! SIGINT, SIGTERM or SIGQUIT. Any of user code, the watcher or a fatal path
//! may ask for close; only the first request runs it.
//!
//! # Example
//!
//! ```rust,no_run
//! use kafka_proxy::{KafkaConfig, Producer};
//!
//! #[tokio::main]
//! async fn main() -> kafka_proxy::Result<()> {
//!     let producer = Producer::builder(KafkaConfig::new(["localhost:9092"]))
//!         .error_handler(|err| eprintln!("delivery failed: {err}"))
//!         .connect()
//!         .await?;
//!
//!     let input = producer.input()?;
//!     let message = producer.create_key_message("orders", "order-1", "created");
//!     if input.send(message).await.is_err() {
//!         eprintln!("producer stopped accepting input");
//!     }
//!
//!     if let Some(err) = producer.close().recv().await {
//!         eprintln!("close failed: {err}");
//!     }
//!     producer.closed().await;
//!     Ok(())
//! }
//! ```

use crate::adapter::Adapter;
use crate::config::KafkaConfig;
use crate::error::{ErrorKind, ProxyError, Result};
use crate::kafka::KafkaAdapter;
use crate::message::{Delivery, DeliveryError, Message};
use crate::policy::{ErrorHandler, ProcessExit, Terminator};
use crate::router::ErrorRouter;
use crate::signal::{ShutdownSignals, SignalWatcher};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Lifecycle state of a [`Producer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Open,
    /// A close sequence is running.
    Closing,
    Closed,
}

enum SignalSource {
    Os,
    Custom(BoxFuture<'static, ()>),
    Disabled,
}

/// Configures and constructs a [`Producer`].
///
/// By default every producer registers its own SIGINT, SIGTERM and SIGQUIT
/// listeners. tokio never restores the default signal disposition once a
/// listener exists, so after the first producer is built those signals no
/// longer kill the process on their own, even once that producer is closed
/// or dropped. Processes that build several producers, or that need Ctrl-C
/// after a producer is gone, should pass one shared future through
/// [`ProducerBuilder::shutdown_signal`] or use
/// [`ProducerBuilder::without_signal_watch`].
pub struct ProducerBuilder {
    config: KafkaConfig,
    handler: Option<ErrorHandler>,
    terminator: Arc<dyn Terminator>,
    signals: SignalSource,
}

impl ProducerBuilder {
    fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            handler: None,
            terminator: Arc::new(ProcessExit),
            signals: SignalSource::Os,
        }
    }

    /// Receives delivery errors while logging is disabled.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(DeliveryError) + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Replaces the default [`ProcessExit`] terminator.
    pub fn terminator(mut self, terminator: Arc<dyn Terminator>) -> Self {
        self.terminator = terminator;
        self
    }

    /// Closes the producer when `signal` completes instead of on OS signals.
    pub fn shutdown_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.signals = SignalSource::Custom(Box::pin(signal));
        self
    }

    pub fn without_signal_watch(mut self) -> Self {
        self.signals = SignalSource::Disabled;
        self
    }

    /// Connects a [`KafkaAdapter`] to the configured brokers.
    ///
    /// # Errors
    ///
    /// - `BrokersNotSet` when no broker address is configured
    /// - `ConnectionFailure` when the client cannot be created or no broker
    ///   answers within the connect timeout
    pub async fn connect(self) -> Result<Producer> {
        self.validate()?;

        let brokers: Vec<String> = self
            .config
            .brokers
            .iter()
            .filter(|broker| !broker.trim().is_empty())
            .cloned()
            .collect();
        let transport = self.config.transport_or_default();

        let adapter = KafkaAdapter::connect(&brokers, &transport)
            .await
            .map_err(|e| ProxyError::new(ErrorKind::ConnectionFailure, e.to_string()))?;

        Ok(self.assemble(Box::new(adapter)))
    }

    /// Wires an already constructed adapter. Fails with `BrokersNotSet` when
    /// no broker address is configured.
    pub fn build<A: Adapter>(self, adapter: A) -> Result<Producer> {
        self.validate()?;
        Ok(self.assemble(Box::new(adapter)))
    }

    fn validate(&self) -> Result<()> {
        if !self.config.has_brokers() {
            return Err(ProxyError::new(
                ErrorKind::BrokersNotSet,
                "No Kafka brokers set.",
            ));
        }
        Ok(())
    }

    fn assemble(self, adapter: Box<dyn Adapter>) -> Producer {
        let ProducerBuilder {
            handler,
            terminator,
            signals,
            ..
        } = self;

        let logging = Arc::new(AtomicBool::new(false));
        let errors = adapter.take_errors();
        let (state, _) = watch::channel(State::Open);

        let producer = Producer {
            shared: Arc::new(Shared {
                adapter,
                state,
                logging: Arc::clone(&logging),
                terminator: Arc::clone(&terminator),
            }),
        };

        match signals {
            SignalSource::Os => match ShutdownSignals::register() {
                Ok(signals) => {
                    SignalWatcher::spawn(&producer, signals.recv());
                }
                Err(e) => warn!("Failed to register shutdown signal handlers: {}", e),
            },
            SignalSource::Custom(signal) => {
                SignalWatcher::spawn(&producer, signal);
            }
            SignalSource::Disabled => debug!("Signal watching disabled"),
        }

        match errors {
            Some(errors) => {
                ErrorRouter::new(handler, logging, terminator).spawn(errors);
            }
            None => warn!("Adapter error channel already taken, delivery errors will not be routed"),
        }

        producer
    }
}

struct Shared {
    adapter: Box<dyn Adapter>,
    state: watch::Sender<State>,
    logging: Arc<AtomicBool>,
    terminator: Arc<dyn Terminator>,
}

impl Shared {
    fn logging_enabled(&self) -> bool {
        self.logging.load(Ordering::Relaxed)
    }

    async fn run_close(&self, report: mpsc::Sender<ProxyError>) {
        match self.adapter.close().await {
            Ok(()) => {
                if self.logging_enabled() {
                    info!("Async producer closed.");
                }
            }
            Err(cause) => {
                let err = ProxyError::from_parts(
                    ErrorKind::ResourceCloseFailure,
                    ["Error closing async producer".to_string(), cause.to_string()],
                );
                if self.logging_enabled() {
                    self.terminator.terminate(&err.to_string());
                } else {
                    warn!("{}", err);
                }
                let _ = report.try_send(err);
            }
        }
        self.state.send_replace(State::Closed);
    }
}

/// Handle to a running producer. Clones share the same adapter and state.
#[derive(Clone)]
pub struct Producer {
    shared: Arc<Shared>,
}

impl Producer {
    pub fn builder(config: KafkaConfig) -> ProducerBuilder {
        ProducerBuilder::new(config)
    }

    /// Connects with default settings: no error handler, OS signal watching,
    /// process exit on fatal errors.
    pub async fn connect(config: KafkaConfig) -> Result<Self> {
        Self::builder(config).connect().await
    }

    /// Turns on logging. Delivery and close errors become fatal from here on.
    pub fn enable_logging(&self) {
        self.shared.logging.store(true, Ordering::Relaxed);
    }

    pub fn is_logging_enabled(&self) -> bool {
        self.shared.logging_enabled()
    }

    /// Builds a keyed message; an empty `key` leaves it unkeyed.
    pub fn create_key_message(
        &self,
        topic: impl Into<String>,
        key: &str,
        value: impl Into<Bytes>,
    ) -> Message {
        Message::keyed(topic, key, value)
    }

    pub fn create_message(&self, topic: impl Into<String>, value: impl Into<Bytes>) -> Message {
        Message::new(topic, value)
    }

    pub fn state(&self) -> State {
        *self.shared.state.borrow()
    }

    /// True once the close sequence has finished. Stays false while a close
    /// is still running.
    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }

    /// The adapter's input sink.
    ///
    /// # Errors
    ///
    /// `ResourceClosedAccess` once a close has been requested.
    pub fn input(&self) -> Result<mpsc::Sender<Message>> {
        match self.state() {
            State::Open => Ok(self.shared.adapter.input()),
            State::Closing => Err(ProxyError::new(
                ErrorKind::ResourceClosedAccess,
                "Producer is closing.",
            )),
            State::Closed => Err(ProxyError::new(
                ErrorKind::ResourceClosedAccess,
                "Producer already closed.",
            )),
        }
    }

    /// Pushes one message into the input sink, waiting for capacity.
    ///
    /// # Errors
    ///
    /// - `ResourceClosedAccess` once a close has been requested
    /// - `ResourceWriteFailure` when the adapter no longer accepts input
    pub async fn send(&self, message: Message) -> Result<()> {
        let input = self.input()?;
        input.send(message).await.map_err(|rejected| {
            ProxyError::from_parts(
                ErrorKind::ResourceWriteFailure,
                [
                    format!("Failed to write message to topic '{}'", rejected.0.topic()),
                    "input channel closed".to_string(),
                ],
            )
        })
    }

    /// Takes the acknowledgement stream, if the adapter reports successes.
    /// The caller is expected to drain it.
    pub fn successes(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.shared.adapter.take_successes()
    }

    pub fn adapter(&self) -> &dyn Adapter {
        self.shared.adapter.as_ref()
    }

    /// Requests close and returns a channel reporting its failure.
    ///
    /// Only the first call runs the adapter's close; later or concurrent calls
    /// get a channel that is already closed. The channel yields at most one
    /// error and then `None`. On a clean close it yields `None` directly.
    pub fn close(&self) -> mpsc::Receiver<ProxyError> {
        let (report, result) = mpsc::channel(1);

        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == State::Open {
                *state = State::Closing;
                true
            } else {
                false
            }
        });
        if !claimed {
            debug!("Producer already closed or closing");
            return result;
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            shared.run_close(report).await;
        });
        result
    }

    /// Completes once the producer is closed.
    pub async fn closed(&self) {
        let mut state = self.shared.state.subscribe();
        let _ = state.wait_for(|state| *state == State::Closed).await;
    }

    pub(crate) fn downgrade(&self) -> WeakProducer {
        WeakProducer {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn terminate(&self, reason: &str) {
        self.shared.terminator.terminate(reason);
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("state", &self.state())
            .field("logging", &self.is_logging_enabled())
            .finish()
    }
}

/// Non-owning reference used by background tasks.
pub(crate) struct WeakProducer {
    shared: Weak<Shared>,
}

impl WeakProducer {
    pub(crate) fn upgrade(&self) -> Option<Producer> {
        self.shared.upgrade().map(|shared| Producer { shared })
    }
}
