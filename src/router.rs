use crate::message::DeliveryError;
use crate::policy::{ErrorHandler, FailurePolicy, Terminator};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Drains an adapter's delivery errors for the lifetime of a producer.
///
/// The policy is resolved per error, so enabling logging after construction
/// switches the router to fail-fast.
pub struct ErrorRouter {
    handler: Option<ErrorHandler>,
    logging: Arc<AtomicBool>,
    terminator: Arc<dyn Terminator>,
}

impl ErrorRouter {
    pub fn new(
        handler: Option<ErrorHandler>,
        logging: Arc<AtomicBool>,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        Self {
            handler,
            logging,
            terminator,
        }
    }

    /// Runs until the adapter closes its error channel.
    pub fn spawn(self, errors: mpsc::UnboundedReceiver<DeliveryError>) -> JoinHandle<()> {
        tokio::spawn(self.run(errors))
    }

    async fn run(self, mut errors: mpsc::UnboundedReceiver<DeliveryError>) {
        while let Some(err) = errors.recv().await {
            self.dispatch(err);
        }
        debug!("Error channel closed, router stopping");
    }

    fn policy(&self) -> FailurePolicy {
        FailurePolicy::resolve(self.logging.load(Ordering::Relaxed), self.handler.as_ref())
    }

    fn dispatch(&self, err: DeliveryError) {
        match self.policy() {
            FailurePolicy::Fatal => {
                error!(topic = %err.message.topic(), "Failed to produce message: {}", err.reason);
                self.terminator
                    .terminate(&format!("Failed to produce message: {}", err));
            }
            FailurePolicy::Propagate(handler) => handler(err),
            FailurePolicy::Discard => {
                warn!(topic = %err.message.topic(), "Dropping delivery error: {}", err.reason);
            }
        }
    }
}
