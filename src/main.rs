//! mqttlink - Main Entry Point
//!
//! Command-line front end for the publish/subscribe client.

use clap::{Parser, Subcommand};
use mqttlink::config::ClientConfig;
use mqttlink::observability::logging::parse_level;
use mqttlink::observability::{init_default_logging, init_logging, LogFormat};
use mqttlink::PubSubClient;
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, Level};

/// Default configuration search paths, in order
const DEFAULT_CONFIG_PATHS: &[&str] = &["mqttlink.toml", "config/mqttlink.toml"];

/// MQTT publish/subscribe client
#[derive(Parser)]
#[command(name = "mqttlink")]
#[command(about = "MQTT publish/subscribe client with automatic reconnection")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe to the consumer topic and print every message until interrupted
    Listen,
    /// Publish one message on the producer topic
    Publish {
        /// Message payload
        message: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_observability(cli.verbose);

    info!("Starting mqttlink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen => run_listener(config).await,
        Commands::Publish { message } => publish_once(config, message).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn init_observability(verbose: u8) {
    if verbose == 0 {
        init_default_logging();
        return;
    }

    let level = match verbose {
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let format = LogFormat::parse(&std::env::var("LOG_FORMAT").unwrap_or_else(|_| "compact".into()));
    let level = std::env::var("LOG_LEVEL")
        .map(|value| parse_level(&value))
        .unwrap_or(level);
    init_logging(level, format, verbose > 1);
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(ClientConfig::load_from_file(path)?)
        }
        None => {
            for path_str in DEFAULT_CONFIG_PATHS {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(ClientConfig::load_from_file(&path)?);
                }
            }

            Err(
                "No configuration file found. Please provide one with -c/--config or create mqttlink.toml"
                    .into(),
            )
        }
    }
}

async fn run_listener(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = PubSubClient::new(config)?;
    client.connect().await?;

    client
        .subscribe(|payload: &[u8]| {
            println!("{}", String::from_utf8_lossy(payload));
        })
        .await;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(client_id = %client.client_id(), "Listening for messages");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    client.close().await?;
    Ok(())
}

async fn publish_once(
    config: ClientConfig,
    message: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = PubSubClient::new(config)?;
    client.connect().await?;

    let produced = client.produce(message.as_bytes()).await;
    if produced.is_ok() {
        info!(bytes = message.len(), "Message published");
    }

    // Close even when publishing failed, then report the first failure
    let closed = client.close().await;
    produced?;
    closed?;
    Ok(())
}

fn handle_config_command(
    mut config: ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        if !config.broker.password.is_empty() {
            config.broker.password = "********".to_string();
        }
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
