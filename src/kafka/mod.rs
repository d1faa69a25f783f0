pub mod producer;


pub use producer::KafkaAdapter;
