use bytes::Bytes;
use thiserror::Error;

/// An outbound record. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    key: Option<String>,
    payload: Bytes,
}

impl Message {
    /// Builds an unkeyed message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload: payload.into(),
        }
    }

    /// Builds a keyed message. An empty key leaves the message unkeyed.
    pub fn keyed(topic: impl Into<String>, key: &str, payload: impl Into<Bytes>) -> Self {
        let mut message = Self::new(topic, payload);
        if !key.is_empty() {
            message.key = Some(key.to_string());
        }
        message
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Acknowledgement for a message the broker accepted.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub partition: i32,
    pub offset: i64,
}

/// A message the transport failed to deliver.
#[derive(Error, Debug, Clone)]
#[error("failed to deliver message to '{}': {}", .message.topic(), .reason)]
pub struct DeliveryError {
    pub message: Message,
    pub reason: String,
}

impl DeliveryError {
    pub fn new(message: Message, reason: impl Into<String>) -> Self {
        Self {
            message,
            reason: reason.into(),
        }
    }
}
