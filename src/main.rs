//! Courier - request/reply message transport over HTTP
//!
//! Usage:
//!   courier [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path
//!   -b, --bind <ADDR>      Listen for inbound requests on this address
//!   --broker <HOST:PORT>   Remote endpoint for outbound requests
//!   -q, --queue <NAME>     Register an echo queue (repeatable)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   -h, --help             Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use courier::config::Config;
use courier::{Connection, EchoConsumer, HttpConnection};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// Courier - request/reply message transport over HTTP
#[derive(Parser, Debug)]
#[command(name = "courier")]
#[command(author = "Courier Contributors")]
#[command(version)]
#[command(about = "Request/reply message transport over HTTP")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to accept inbound requests on
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Remote endpoint for outbound requests (host:port)
    #[arg(long)]
    broker: Option<String>,

    /// Register an echo queue with this name (repeatable)
    #[arg(short, long = "queue")]
    queues: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Split `host:port`, accepting bracketed IPv6 hosts
fn parse_broker(value: &str) -> Option<(String, u16)> {
    let (host, port) = value.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host.to_string(), port.parse().ok()?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::from_env()?,
    };

    // CLI overrides config, config overrides default (warn)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    if let Some(broker) = &args.broker {
        match parse_broker(broker) {
            Some((host, port)) => {
                config.broker.host = host;
                config.broker.port = port;
            }
            None => {
                eprintln!("Invalid --broker value '{}': expected host:port", broker);
                std::process::exit(1);
            }
        }
    }
    let bind_addr = args.bind.or(config.server.bind);

    info!("Starting Courier");
    info!("  Broker: http://{}{}", config.broker.authority(), config.broker.path);
    info!("  Max body size: {} bytes", config.limits.max_body_size);

    match config.limits.default_time_to_live {
        ttl if ttl.is_zero() => info!("  Default time-to-live: none"),
        ttl => info!("  Default time-to-live: {:?}", ttl),
    }

    let metrics = config.metrics.enabled.then(|| Arc::new(courier::Metrics::new()));
    let connection = match &metrics {
        Some(metrics) => {
            HttpConnection::with_metrics(config.broker.clone(), &config.limits, metrics.clone())
        }
        None => HttpConnection::new(config.broker.clone(), &config.limits),
    };

    match metrics {
        Some(metrics) => {
            let metrics_server = courier::MetricsServer::bind(metrics, config.metrics.bind).await?;
            info!("  Metrics: enabled (http://{}/metrics)", metrics_server.local_addr()?);
            tokio::spawn(metrics_server.run(connection.subscribe_shutdown()));
        }
        None => info!("  Metrics: disabled"),
    }

    let queue_names = config
        .queue
        .iter()
        .map(|q| q.name.clone())
        .chain(args.queues.iter().cloned());
    for name in queue_names {
        connection.create_queue(&name, Arc::new(EchoConsumer))?;
    }

    match bind_addr {
        Some(addr) => {
            let local = connection.listen(addr).await?;
            info!("  Listening: http://{}", local);
        }
        None => info!("  Listening: disabled"),
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    connection.shutdown();

    Ok(())
}
