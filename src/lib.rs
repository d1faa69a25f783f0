pub mod adapter;
pub mod config;
pub mod error;
pub mod message;
pub mod policy;
pub mod producer;
pub mod router;
pub mod signal;

pub mod kafka;

// `MemoryAdapter` and `RecordingTerminator` are test doubles
pub use adapter::{Adapter, MemoryAdapter};
pub use config::{Config, KafkaConfig, TransportConfig};
pub use error::{AdapterError, ErrorKind, ProxyError, Result};
pub use kafka::KafkaAdapter;
pub use message::{Delivery, DeliveryError, Message};
pub use policy::{ErrorHandler, FailurePolicy, ProcessExit, RecordingTerminator, Terminator};
pub use producer::{Producer, ProducerBuilder, State};
pub use router::ErrorRouter;
pub use signal::{ShutdownSignals, SignalWatcher};
