use crate::adapter::Adapter;
use crate::config::TransportConfig;
use crate::error::AdapterError;
use crate::message::{Delivery, DeliveryError, Message};
use futures::future::BoxFuture;
use rdkafka::client::ClientContext;
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{DeliveryResult, Message as _};
use rdkafka::producer::{BaseRecord, Producer as _, ProducerContext, ThreadedProducer};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Wait between enqueue attempts while librdkafka's local queue is full.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(50);

/// Forwards librdkafka delivery reports into the adapter's output channels.
struct DeliveryContext {
    successes: Option<mpsc::UnboundedSender<Delivery>>,
    errors: mpsc::UnboundedSender<DeliveryError>,
}

impl ClientContext for DeliveryContext {}

impl ProducerContext for DeliveryContext {
    type DeliveryOpaque = Box<Message>;

    fn delivery(&self, result: &DeliveryResult<'_>, message: Self::DeliveryOpaque) {
        match result {
            Ok(delivered) => {
                if let Some(successes) = &self.successes {
                    let _ = successes.send(Delivery {
                        message: *message,
                        partition: delivered.partition(),
                        offset: delivered.offset(),
                    });
                }
            }
            Err((error, _)) => {
                let _ = self.errors.send(DeliveryError::new(*message, error.to_string()));
            }
        }
    }
}

struct Shutdown {
    trigger: oneshot::Sender<()>,
    pump: JoinHandle<Result<(), AdapterError>>,
}

/// [`Adapter`] backed by an rdkafka [`ThreadedProducer`].
pub struct KafkaAdapter {
    input: mpsc::Sender<Message>,
    successes: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    errors: Mutex<Option<mpsc::UnboundedReceiver<DeliveryError>>>,
    shutdown: Mutex<Option<Shutdown>>,
}

impl KafkaAdapter {
    /// Creates the producer and probes the cluster for metadata, failing if
    /// no broker answers within the connect timeout.
    #[instrument(skip(transport))]
    pub async fn connect(brokers: &[String], transport: &TransportConfig) -> Result<Self, AdapterError> {
        let (success_tx, success_rx) = if transport.return_successes {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };
        let (error_tx, error_rx) = mpsc::unbounded_channel();

        let context = DeliveryContext {
            successes: success_tx,
            errors: error_tx.clone(),
        };
        let producer: ThreadedProducer<DeliveryContext> = transport
            .client_config(brokers)
            .create_with_context(context)?;

        let timeout = transport.connect_timeout();
        let producer = tokio::task::spawn_blocking(move || {
            producer
                .client()
                .fetch_metadata(None, timeout)
                .map(|metadata| {
                    debug!("Cluster reports {} broker(s)", metadata.brokers().len());
                    producer
                })
        })
        .await??;

        info!("Connected to Kafka");

        let (input, input_rx) = mpsc::channel(transport.channel_buffer_size.max(1));
        let (trigger, shutdown_rx) = oneshot::channel();
        let pump = Pump {
            producer,
            input: input_rx,
            errors: error_tx,
            flush_timeout: transport.flush_timeout(),
        };
        let pump = tokio::spawn(pump.run(shutdown_rx));

        Ok(Self {
            input,
            successes: Mutex::new(success_rx),
            errors: Mutex::new(Some(error_rx)),
            shutdown: Mutex::new(Some(Shutdown { trigger, pump })),
        })
    }
}

impl Adapter for KafkaAdapter {
    fn input(&self) -> mpsc::Sender<Message> {
        self.input.clone()
    }

    fn take_successes(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        lock(&self.successes).take()
    }

    fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<DeliveryError>> {
        lock(&self.errors).take()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), AdapterError>> {
        Box::pin(async move {
            let Some(Shutdown { trigger, pump }) = lock(&self.shutdown).take() else {
                debug!("Kafka adapter already closed");
                return Ok(());
            };
            let _ = trigger.send(());
            pump.await?
        })
    }

    fn async_close(&self) {
        if let Some(Shutdown { trigger, .. }) = lock(&self.shutdown).take() {
            // The detached pump still flushes and reports its own failures.
            let _ = trigger.send(());
        }
    }
}

/// Moves messages from the input channel into librdkafka.
struct Pump {
    producer: ThreadedProducer<DeliveryContext>,
    input: mpsc::Receiver<Message>,
    errors: mpsc::UnboundedSender<DeliveryError>,
    flush_timeout: Duration,
}

impl Pump {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) -> Result<(), AdapterError> {
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                next = self.input.recv() => match next {
                    Some(message) => self.enqueue(message).await,
                    None => break,
                },
            }
        }

        self.input.close();
        let mut drained = 0usize;
        while let Ok(message) = self.input.try_recv() {
            self.enqueue(message).await;
            drained += 1;
        }
        if drained > 0 {
            debug!("Enqueued {} buffered message(s) during shutdown", drained);
        }

        let Pump {
            producer,
            errors,
            flush_timeout,
            ..
        } = self;
        drop(errors);

        // Dropping the producer drops the delivery context, which closes the
        // output channels.
        let flushed = tokio::task::spawn_blocking(move || {
            let flushed = producer.flush(flush_timeout);
            drop(producer);
            flushed
        })
        .await?;

        if let Err(e) = &flushed {
            warn!("Failed to flush Kafka producer: {}", e);
        }
        Ok(flushed?)
    }

    async fn enqueue(&self, message: Message) {
        if message.topic().is_empty() {
            let _ = self
                .errors
                .send(DeliveryError::new(message, "message topic is empty"));
            return;
        }

        loop {
            match self.try_send(&message) {
                Ok(()) => return,
                Err(KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull)) => {
                    debug!("Producer queue full, waiting");
                    tokio::time::sleep(QUEUE_FULL_BACKOFF).await;
                }
                Err(e) => {
                    let _ = self.errors.send(DeliveryError::new(message, e.to_string()));
                    return;
                }
            }
        }
    }

    fn try_send(&self, message: &Message) -> KafkaResult<()> {
        let mut record: BaseRecord<'_, [u8], [u8], Box<Message>> =
            BaseRecord::with_opaque_to(message.topic(), Box::new(message.clone()))
                .payload(message.payload());
        if let Some(key) = message.key() {
            record = record.key(key.as_bytes());
        }
        self.producer.send(record).map_err(|(e, _)| e)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
