//! In-process adapter for tests and dry runs.
//!
//! Messages pushed into the input channel are recorded and acknowledged
//! with increasing offsets on partition 0. Messages with an empty topic are
//! reported as delivery errors. Close behaviour can be slowed down or made
//! to fail to exercise shutdown paths.
//!
//! This is a test double. The fault-injection knobs
//! ([`MemoryAdapter::with_close_failure`], [`MemoryAdapter::with_close_delay`],
//! [`MemoryAdapter::inject_error`]) exist only to drive failure paths and
//! have no use against a real transport.

use super::Adapter;
use crate::error::AdapterError;
use crate::message::{Delivery, DeliveryError, Message};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

const DEFAULT_CAPACITY: usize = 256;

struct Shutdown {
    trigger: oneshot::Sender<()>,
    pump: JoinHandle<()>,
}

pub struct MemoryAdapter {
    input: mpsc::Sender<Message>,
    successes: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    errors: Mutex<Option<mpsc::UnboundedReceiver<DeliveryError>>>,
    error_sender: Mutex<Option<mpsc::UnboundedSender<DeliveryError>>>,
    shutdown: Mutex<Option<Shutdown>>,
    delivered: Arc<Mutex<Vec<Message>>>,
    close_calls: AtomicUsize,
    close_failure: Option<String>,
    close_delay: Duration,
}

impl MemoryAdapter {
    /// Creates the adapter and starts its pump. Must be called inside a
    /// tokio runtime.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (input, input_rx) = mpsc::channel(capacity.max(1));
        let (success_tx, success_rx) = mpsc::unbounded_channel();
        let (error_tx, error_rx) = mpsc::unbounded_channel();
        let (trigger, shutdown_rx) = oneshot::channel();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let pump = tokio::spawn(pump(
            input_rx,
            shutdown_rx,
            success_tx,
            error_tx.clone(),
            Arc::clone(&delivered),
        ));

        Self {
            input,
            successes: Mutex::new(Some(success_rx)),
            errors: Mutex::new(Some(error_rx)),
            error_sender: Mutex::new(Some(error_tx)),
            shutdown: Mutex::new(Some(Shutdown { trigger, pump })),
            delivered,
            close_calls: AtomicUsize::new(0),
            close_failure: None,
            close_delay: Duration::ZERO,
        }
    }

    /// Makes every close attempt fail with `reason`. Test-only knob.
    pub fn with_close_failure(mut self, reason: impl Into<String>) -> Self {
        self.close_failure = Some(reason.into());
        self
    }

    /// Delays every close attempt.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    /// Pushes a delivery error onto the error channel. Returns `false` once
    /// the adapter is closed. Test-only knob.
    pub fn inject_error(&self, error: DeliveryError) -> bool {
        match lock(&self.error_sender).as_ref() {
            Some(sender) => sender.send(error).is_ok(),
            None => false,
        }
    }

    /// Messages accepted so far, in arrival order.
    pub fn delivered(&self) -> Vec<Message> {
        lock(&*self.delivered).clone()
    }

    /// How many times `close` has been invoked.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    fn stop(&self) -> Option<Shutdown> {
        lock(&self.error_sender).take();
        lock(&self.shutdown).take()
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Adapter for MemoryAdapter {
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
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            if !self.close_delay.is_zero() {
                tokio::time::sleep(self.close_delay).await;
            }
            if let Some(reason) = &self.close_failure {
                return Err(AdapterError::Close {
                    message: reason.clone(),
                });
            }

            if let Some(Shutdown { trigger, pump }) = self.stop() {
                let _ = trigger.send(());
                pump.await?;
            }
            Ok(())
        })
    }

    fn async_close(&self) {
        if let Some(Shutdown { trigger, .. }) = self.stop() {
            let _ = trigger.send(());
        }
    }
}

async fn pump(
    mut input: mpsc::Receiver<Message>,
    mut shutdown: oneshot::Receiver<()>,
    successes: mpsc::UnboundedSender<Delivery>,
    errors: mpsc::UnboundedSender<DeliveryError>,
    delivered: Arc<Mutex<Vec<Message>>>,
) {
    let mut offset = 0i64;
    let mut accept = |message: Message| {
        if message.topic().is_empty() {
            let _ = errors.send(DeliveryError::new(message, "message topic is empty"));
            return;
        }
        lock(&*delivered).push(message.clone());
        let _ = successes.send(Delivery {
            message,
            partition: 0,
            offset,
        });
        offset += 1;
    };

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            next = input.recv() => match next {
                Some(message) => accept(message),
                None => break,
            },
        }
    }

    input.close();
    while let Ok(message) = input.try_recv() {
        accept(message);
    }
    debug!("Memory adapter pump stopped");
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
