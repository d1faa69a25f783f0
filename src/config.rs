use rdkafka::ClientConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    /// Enables producer logging, which also turns delivery and close errors fatal.
    #[serde(default)]
    pub logging: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct KafkaConfig {
    #[serde(default)]
    pub brokers: Vec<String>,
    /// Overrides the default transport settings when present.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TransportConfig {
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Emit an acknowledgement for every delivered message.
    #[serde(default)]
    pub return_successes: bool,
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_flush_timeout")]
    pub flush_timeout_secs: u64,
    /// Raw librdkafka properties, applied last.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("KAFKA_PROXY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("kafka.brokers"),
            )
            .build()?;

        settings.try_deserialize()
    }
}

impl KafkaConfig {
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            transport: None,
        }
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = Some(transport);
        self
    }

    /// True when at least one non-blank broker address is configured.
    pub fn has_brokers(&self) -> bool {
        self.brokers.iter().any(|broker| !broker.trim().is_empty())
    }

    pub fn transport_or_default(&self) -> TransportConfig {
        self.transport.clone().unwrap_or_default()
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_secs(self.flush_timeout_secs)
    }

    pub fn client_config(&self, brokers: &[String]) -> ClientConfig {
        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", brokers.join(","))
            .set("acks", &self.acks)
            .set("compression.type", &self.compression)
            .set("linger.ms", self.linger_ms.to_string())
            .set("batch.size", self.batch_size.to_string());

        for (key, value) in &self.properties {
            client.set(key, value);
        }
        client
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            acks: default_acks(),
            compression: default_compression(),
            linger_ms: default_linger_ms(),
            batch_size: default_batch_size(),
            return_successes: false,
            channel_buffer_size: default_channel_buffer_size(),
            connect_timeout_secs: default_connect_timeout(),
            flush_timeout_secs: default_flush_timeout(),
            properties: BTreeMap::new(),
        }
    }
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_batch_size() -> usize {
    16384
}

fn default_channel_buffer_size() -> usize {
    256
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_flush_timeout() -> u64 {
    30
}
