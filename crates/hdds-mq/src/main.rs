// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS Message Queue CLI
//!
//! # Usage
//!
//! ```bash
//! # Generate an example configuration file
//! hdds-mq gen-config --output mq.toml
//!
//! # Validate a configuration file
//! hdds-mq validate --config mq.toml
//!
//! # Send 100 messages to an endpoint that registers 500 ms later
//! hdds-mq demo --count 100 --register-delay-ms 500
//! ```

use clap::{Parser, Subcommand};
use hdds_mq::{
    ConsumeError, Consumer, EndpointProperties, EndpointProvider, Message, MessageQueue, MqConfig,
    ProviderHandle, QueueStatsSnapshot, TimeoutAdmin, TokioExecutor,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// HDDS Message Queue
#[derive(Parser, Debug)]
#[command(name = "hdds-mq")]
#[command(about = "HDDS Message Queue - In-process endpoint routing and pending queues")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "mq.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate,

    /// Dispatch messages to an endpoint that registers late
    ///
    /// Deliveries run on the tokio blocking pool, so `worker_threads` from the
    /// configuration is not used by this command.
    Demo {
        /// Number of messages to dispatch
        #[arg(long, default_value = "10")]
        count: u64,

        /// Delay before the sink endpoint registers (milliseconds)
        #[arg(long, default_value = "200")]
        register_delay_ms: u64,

        /// Destination id of the sink endpoint
        #[arg(long, default_value = "sink")]
        destination: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate => {
            let Some(config) = args.config else {
                eprintln!("Missing --config");
                std::process::exit(2);
            };
            cmd_validate(config)
        }
        Commands::Demo {
            count,
            register_delay_ms,
            destination,
        } => {
            let config = match args.config {
                Some(ref path) => MqConfig::from_file(path)?,
                None => MqConfig::default(),
            };
            cmd_demo(config, count, register_delay_ms, destination).await
        }
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = MqConfig {
        name: "example-queue".into(),
        ..MqConfig::default()
    }
    .worker_threads(4);

    let toml_str = toml::to_string_pretty(&config)?;

    let content = format!(
        r#"# HDDS Message Queue Configuration
# Generated by hdds-mq gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match MqConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Queue: {}", config.name);
            println!("Message timeout: {}s", config.msg_timeout_secs);
            println!("Worker threads: {}", config.worker_threads);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

struct CountingSink {
    id: String,
    received: AtomicU64,
}

impl Consumer for CountingSink {
    fn on_message(&self, message: Message) -> Result<(), ConsumeError> {
        let n = self.received.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("{} received ({} so far)", message, n);
        Ok(())
    }
}

struct SinkProvider(Arc<CountingSink>);

impl EndpointProvider for SinkProvider {
    fn properties(&self) -> EndpointProperties {
        EndpointProperties::new(self.0.id.clone())
    }

    fn consumer(&self) -> Arc<dyn Consumer> {
        self.0.clone()
    }
}

async fn cmd_demo(
    config: MqConfig,
    count: u64,
    register_delay_ms: u64,
    destination: String,
) -> Result<(), Box<dyn std::error::Error>> {
    // Blocking pool of the CLI runtime; worker_threads does not apply.
    let executor = TokioExecutor::current().ok_or("demo requires a tokio runtime")?;
    let queue = MessageQueue::new(config, Arc::new(executor), Arc::new(TimeoutAdmin::new()))?;
    queue.activate();

    println!("HDDS Message Queue v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();

    for i in 0..count {
        let mut message = Message::new(destination.as_str()).with_origin("demo");
        message.attach(i);
        queue.dispatch(message);
    }
    println!(
        "Dispatched {} message(s), {} held for [{}]",
        count,
        queue.pending_len(&destination),
        destination
    );

    tokio::time::sleep(Duration::from_millis(register_delay_ms)).await;

    let sink = Arc::new(CountingSink {
        id: destination.clone(),
        received: AtomicU64::new(0),
    });
    queue.register(ProviderHandle(1), Arc::new(SinkProvider(sink.clone())))?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while sink.received.load(Ordering::Relaxed) < count && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    println!();
    println!("Final Statistics:");
    print_stats(&queue.stats());
    Ok(())
}

fn print_stats(stats: &QueueStatsSnapshot) {
    println!("--- Queue Statistics ---");
    println!(
        "  {} dispatched, {} delivered ({:.1} msg/s), {} held, {} timed out, {} failed, {} dropped",
        stats.messages_dispatched,
        stats.messages_delivered,
        stats.messages_per_second(),
        stats.messages_held,
        stats.messages_timed_out,
        stats.messages_failed,
        stats.messages_dropped
    );
}
