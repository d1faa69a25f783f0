//! Error types and result handling for kafka-proxy.
//!
//! Every fallible operation on a [`Producer`](crate::Producer) reports a
//! [`ProxyError`]: a flat, numeric-coded, timestamped value. Adapters use the
//! richer [`AdapterError`] internally, which is folded into a `ProxyError` at
//! the producer boundary.
//!
//! # Example
//!
//! ```rust
//! use kafka_proxy::{ErrorKind, ProxyError, Result};
//!
//! fn check_brokers(brokers: &[String]) -> Result<()> {
//!     if brokers.is_empty() {
//!         return Err(ProxyError::new(ErrorKind::BrokersNotSet, "No Kafka brokers set."));
//!     }
//!     Ok(())
//! }
//!
//! let err = check_brokers(&[]).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::BrokersNotSet);
//! assert_eq!(err.code(), 1);
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Layout used when rendering the error timestamp, e.g. `02/Jan/2006-15:04:05`.
const TIME_LAYOUT: &str = "%d/%b/%Y-%H:%M:%S";

/// The kind of a [`ProxyError`], with a stable numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorKind {
    /// No brokers were configured.
    BrokersNotSet = 1,
    /// The transport could not be established.
    ConnectionFailure = 2,
    /// Closing the transport failed.
    ResourceCloseFailure = 3,
    /// The producer was accessed after it was closed.
    ResourceClosedAccess = 4,
    /// Writing to the transport failed.
    ResourceWriteFailure = 5,
}

impl ErrorKind {
    /// Numeric code of this kind.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// An error raised while talking to Kafka.
///
/// Immutable once created; cheap to clone and safe to send across tasks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: Error {}: {}", .time.format(TIME_LAYOUT), .kind.code(), .message)]
pub struct ProxyError {
    kind: ErrorKind,
    time: DateTime<Utc>,
    message: String,
}

impl ProxyError {
    /// Creates an error of the given kind, stamped with the current time.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            time: Utc::now(),
            message: message.into(),
        }
    }

    /// Creates an error whose message is the given parts joined by `": "`.
    ///
    /// ```rust
    /// use kafka_proxy::{ErrorKind, ProxyError};
    ///
    /// let err = ProxyError::from_parts(ErrorKind::ConnectionFailure, ["connect", "refused"]);
    /// assert_eq!(err.message(), "connect: refused");
    /// ```
    pub fn from_parts<I, S>(kind: ErrorKind, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let message = parts
            .into_iter()
            .map(|part| part.as_ref().to_string())
            .collect::<Vec<_>>()
            .join(": ");
        Self::new(kind, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> u8 {
        self.kind.code()
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failures raised inside an [`Adapter`](crate::adapter::Adapter).
#[derive(Error, Debug)]
pub enum AdapterError {
    /// Kafka client or producer error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// A background task of the adapter panicked or was cancelled.
    #[error("Task error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The adapter refused to close.
    #[error("Close error: {message}")]
    Close {
        /// Why the close failed
        message: String,
    },
}

/// A convenient Result type alias for kafka-proxy operations.
///
/// This is equivalent to `std::result::Result<T, kafka_proxy::ProxyError>`.
pub type Result<T> = std::result::Result<T, ProxyError>;
