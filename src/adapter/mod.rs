//! The transport capability a [`Producer`](crate::Producer) drives.
//!
//! An adapter accepts messages on a bounded input channel and reports the
//! outcome of each delivery on two output channels. Output receivers are
//! handed out once; the adapter closes them when it shuts down, which is
//! what ends the producer's error routing task.

pub mod memory;

use crate::error::AdapterError;
use crate::message::{Delivery, DeliveryError, Message};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use memory::MemoryAdapter;

/// Capability over an asynchronous message transport.
pub trait Adapter: Send + Sync + 'static {
    /// Sink for outbound messages.
    fn input(&self) -> mpsc::Sender<Message>;

    /// Takes the acknowledgement stream. Returns `None` once taken or when
    /// the adapter does not report successes.
    fn take_successes(&self) -> Option<mpsc::UnboundedReceiver<Delivery>>;

    /// Takes the delivery error stream. Returns `None` once taken.
    fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<DeliveryError>>;

    /// Stops accepting input, drains what is buffered and releases the
    /// transport. Calling it again after a successful close is a no-op.
    fn close(&self) -> BoxFuture<'_, Result<(), AdapterError>>;

    /// Starts shutting down without waiting for the outcome.
    fn async_close(&self);
}

impl<A: Adapter> Adapter for Arc<A> {
    fn input(&self) -> mpsc::Sender<Message> {
        (**self).input()
    }

    fn take_successes(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        (**self).take_successes()
    }

    fn take_errors(&self) -> Option<mpsc::UnboundedReceiver<DeliveryError>> {
        (**self).take_errors()
    }

    fn close(&self) -> BoxFuture<'_, Result<(), AdapterError>> {
        (**self).close()
    }

    fn async_close(&self) {
        (**self).async_close()
    }
}
