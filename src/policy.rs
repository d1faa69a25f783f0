//! What happens when a delivery or close error reaches the producer.
//!
//! With logging enabled the producer runs fail-fast: the error is logged and
//! the [`Terminator`] ends the process. Otherwise errors go to the
//! user-supplied handler, or are logged and dropped when there is none.

use crate::message::DeliveryError;
use std::sync::{Arc, Mutex};
use tracing::error;

/// Callback receiving delivery errors in non fail-fast mode.
pub type ErrorHandler = Arc<dyn Fn(DeliveryError) + Send + Sync>;

/// Strategy applied to a single delivery error.
#[derive(Clone)]
pub enum FailurePolicy {
    /// Log and terminate the process.
    Fatal,
    /// Hand the error to user code.
    Propagate(ErrorHandler),
    /// Log and drop.
    Discard,
}

impl FailurePolicy {
    pub fn resolve(fail_fast: bool, handler: Option<&ErrorHandler>) -> Self {
        match (fail_fast, handler) {
            (true, _) => FailurePolicy::Fatal,
            (false, Some(handler)) => FailurePolicy::Propagate(Arc::clone(handler)),
            (false, None) => FailurePolicy::Discard,
        }
    }
}

impl std::fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Fatal => f.write_str("Fatal"),
            FailurePolicy::Propagate(_) => f.write_str("Propagate(..)"),
            FailurePolicy::Discard => f.write_str("Discard"),
        }
    }
}

/// Ends the process on an unrecoverable error.
pub trait Terminator: Send + Sync + 'static {
    fn terminate(&self, reason: &str);
}

/// Logs the reason and exits with status 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, reason: &str) {
        error!(reason, "Terminating process");
        std::process::exit(1);
    }
}

/// Records termination requests instead of exiting.
///
/// A test double: production code should use [`ProcessExit`] or its own
/// [`Terminator`].
#[derive(Debug, Default)]
pub struct RecordingTerminator {
    reasons: Mutex<Vec<String>>,
}

impl RecordingTerminator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons
            .lock()
            .map(|reasons| reasons.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.reasons().len()
    }
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, reason: &str) {
        error!(reason, "Termination requested");
        if let Ok(mut reasons) = self.reasons.lock() {
            reasons.push(reason.to_string());
        }
    }
}
