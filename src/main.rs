use anyhow::Context;
use clap::Parser;
use kafka_proxy::{Config, Producer};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Reads lines from stdin and produces each one as a message.
#[derive(Parser, Debug)]
#[command(name = "kafka-proxy")]
#[command(about = "Pipe stdin lines into a Kafka topic", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, value_delimiter = ',', help = "Broker list, overrides the config file")]
    brokers: Vec<String>,

    #[arg(short, long)]
    topic: String,

    #[arg(short, long, default_value = "", help = "Message key, empty for unkeyed")]
    key: String,

    #[arg(long, help = "Terminate on the first delivery or close error")]
    fail_fast: bool,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Config::from_file(path)
                .with_context(|| format!("failed to load configuration from {:?}", path))?
        }
        None => Config::default(),
    };
    if !args.brokers.is_empty() {
        config.kafka.brokers = args.brokers.clone();
    }

    info!(
        kafka_brokers = ?config.kafka.brokers,
        topic = %args.topic,
        fail_fast = args.fail_fast || config.logging,
        "Configuration summary"
    );

    let producer = Producer::builder(config.kafka.clone())
        .error_handler(|err| warn!(topic = %err.message.topic(), "Delivery failed: {}", err.reason))
        .connect()
        .await?;
    if args.fail_fast || config.logging {
        producer.enable_logging();
    }

    let input = producer.input()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut produced = 0u64;

    loop {
        tokio::select! {
            _ = producer.closed() => {
                info!("Producer closed, no longer reading input");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    let message = producer.create_key_message(args.topic.as_str(), &args.key, line);
                    if input.send(message).await.is_err() {
                        warn!("Producer stopped accepting input");
                        break;
                    }
                    produced += 1;
                }
                None => break,
            },
        }
    }
    drop(input);

    info!(produced, "Input finished, closing producer");
    if let Some(err) = producer.close().recv().await {
        error!("{}", err);
        return Err(err.into());
    }
    producer.closed().await;

    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_proxy=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("kafka_proxy=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
