//! gatelink - device-side MQTT connection manager
//!
//! Connects a device (optionally acting as a gateway) to its broker, reports
//! configured sub-devices online and keeps the session alive until signalled.

use gatelink::config::LinkConfig;
use gatelink::connection::{Completion, Connection, ConnectionListener, ConnectionStatus};
use gatelink::credentials::CredentialSigner;
use gatelink::gateway::Gateway;
use gatelink::observability::init_default_logging;
use gatelink::transport::mqtt::RumqttcTransport;
use gatelink::transport::{event_channel, Message};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::{
    signal,
    time::{sleep, Duration, Instant},
};
use tracing::{debug, error, info, warn};

/// Device-side MQTT connection manager with gateway sub-device support
#[derive(Parser)]
#[command(name = "gatelink")]
#[command(about = "Device-side MQTT connection manager with gateway sub-device support")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "GATELINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, report sub-devices online and run until interrupted
    Run,
    /// Print the broker credentials derived from the configured secret
    Sign,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Listener that turns every callback into a log line
struct LoggingListener;

impl ConnectionListener for LoggingListener {
    fn on_completion(&self, completion: Completion) {
        if completion.status().is_ok() {
            info!("{} completed", completion.kind());
        } else {
            warn!(
                "{} failed with {}: {}",
                completion.kind(),
                completion.status(),
                completion.detail()
            );
        }
    }

    fn on_connection_lost(&self, cause: &str) {
        warn!("Connection lost: {}", cause);
    }

    fn on_message_received(&self, topic: &str, message: &Message) {
        info!(
            "Message on {} (id={}, {} bytes): {}",
            topic,
            message.id,
            message.payload.len(),
            String::from_utf8_lossy(&message.payload)
        );
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting gatelink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_device(config).await,
        Commands::Sign => handle_sign_command(&config),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: Option<&Path>) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(LinkConfig::load_from_file(path)?);
    }

    for path_str in ["gatelink.toml", "config/gatelink.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(LinkConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create gatelink.toml".into())
}

async fn run_device(config: LinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    let settings = config.connection_settings()?;
    let options = config.connect_options();
    let connect_timeout = options.connection_timeout + Duration::from_secs(2);
    info!(
        "Device {}/{} connecting to {}",
        config.device.product_id, config.device.device_name, config.mqtt.broker_url
    );

    let (events, receiver) = event_channel();
    let transport = Arc::new(RumqttcTransport::new(events)?);
    let connection = Arc::new(Connection::new(settings, transport, Arc::new(LoggingListener)));
    let event_loop = connection.spawn_event_loop(receiver);

    let gateway = config
        .gateway_profile()
        .map(|profile| Gateway::new(Arc::clone(&connection), profile));
    if let Some(gateway) = &gateway {
        for (product_id, device_name, record) in config.subdevice_records() {
            gateway.add_subdev(&product_id, &device_name, record)?;
        }
    }

    connection.connect(Some(options), None)?;
    wait_for_connection(&connection, connect_timeout).await?;

    if let Some(gateway) = &gateway {
        for key in gateway.subdevs() {
            if let Err(e) = gateway.report_online(&key.product_id, &key.device_name) {
                warn!("Online report for {} failed: {}", key, e);
            }
        }
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Device is running, waiting for messages...");

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    if let Some(gateway) = &gateway {
        for key in gateway.subdevs() {
            if let Err(e) = gateway.report_offline(&key.product_id, &key.device_name) {
                debug!("Offline report for {} skipped: {}", key, e);
            }
        }
    }

    if let Err(e) = connection.disconnect(Duration::from_secs(5), None) {
        warn!("Disconnect skipped: {}", e);
    } else {
        wait_for_status(&connection, ConnectionStatus::Disconnected, Duration::from_secs(6)).await;
    }

    info!("Final metrics: {}", serde_json::to_string(&connection.metrics())?);
    event_loop.abort();
    Ok(())
}

/// Wait until the first connect attempt resolves
async fn wait_for_connection(
    connection: &Connection,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let deadline = Instant::now() + timeout;
    loop {
        match connection.status() {
            ConnectionStatus::Connected => return Ok(()),
            ConnectionStatus::ConnectFailed => {
                return Err(format!("connect to {} failed", connection.server_uri()).into())
            }
            _ if Instant::now() >= deadline => {
                return Err(format!("connect to {} timed out", connection.server_uri()).into())
            }
            _ => sleep(Duration::from_millis(100)).await,
        }
    }
}

async fn wait_for_status(connection: &Connection, status: ConnectionStatus, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while connection.status() != status && Instant::now() < deadline {
        sleep(Duration::from_millis(50)).await;
    }
}

fn handle_sign_command(config: &LinkConfig) -> Result<(), Box<dyn std::error::Error>> {
    let identity = config.identity()?;
    let credentials = CredentialSigner::sign(&identity, config.mqtt.automatic_reconnect);

    println!("client_id = {}", credentials.client_id);
    println!("username  = {}", credentials.username);
    match &credentials.password {
        Some(password) => println!("password  = {password}"),
        None => println!("password  = (none, no usable secret configured)"),
    }
    Ok(())
}

fn handle_config_command(config: &LinkConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
