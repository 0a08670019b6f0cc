//! rp-server - Standalone headless driver for the Remote-Play streaming
//! bridge.
//!
//! Discovers or is pointed at a console, registers (or loads previously
//! issued credentials), establishes a session, and streams decoded frames
//! to a file-dumping `Receiver`. Real deployments swap that receiver for a
//! WebRTC bridge; wiring one up is explicitly out of scope for this crate
//! (see `rp_core::Receiver`).

mod config;
mod receiver;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rp_core::{Console, ConsoleStatus, DeviceCredentials};
use tokio::signal;

use crate::config::ServerConfig;
use crate::receiver::FileDumpReceiver;

/// rp-server - headless console-to-browser Remote Play streaming driver.
#[derive(Parser, Debug)]
#[command(name = "rp-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "RP_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Console IP address (overrides config file / auto-discovery).
    #[arg(long, env = "RP_CONSOLE_IP")]
    console_ip: Option<std::net::IpAddr>,

    /// 8-digit PIN shown on the console's "Link device" screen. Only needed
    /// the first time a console is registered; ignored when valid
    /// credentials already exist on disk.
    #[arg(long, env = "RP_PIN")]
    pin: Option<String>,

    /// PSN account id, base64-encoded (8 bytes), associated with the
    /// account that generated the PIN. Only needed alongside `--pin`.
    #[arg(long, env = "RP_ACCOUNT_ID")]
    account_id: Option<String>,

    /// Friendly name to present to the console during registration.
    #[arg(long, default_value = "rp-server", env = "RP_HOST_NAME")]
    host_name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("rp-server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(ip) = args.console_ip {
        config.console_ip = Some(ip);
    }

    let core_config = config.to_core_config();
    let service = rp_core::RemotePlayService::new(core_config);

    let console = resolve_console(&service, &config).await?;
    log::info!(
        "target console: {} ({} at {})",
        console.host_name,
        console.host_type,
        console.ip
    );

    let creds = obtain_credentials(&service, &config, &console, &args).await?;

    log::info!("establishing session...");
    let stream = service
        .connect(&creds)
        .await
        .context("Failed to establish Remote Play session")?;
    log::info!("session {} established", stream.id());

    let receiver = std::sync::Arc::new(
        FileDumpReceiver::new(config.output_dir.clone())
            .context("Failed to open dump output directory")?,
    );
    stream.add_receiver(receiver);
    stream.start(service.spawner());
    log::info!("streaming started; dumping elementary streams to {}", config.output_dir.display());

    shutdown_signal().await;
    log::info!("shutdown signal received, cleaning up...");

    service.shutdown().await;
    log::info!("shutdown complete");
    Ok(())
}

/// Resolves which console to connect to: an explicit IP is probed directly
/// (§4.1 unicast path), otherwise a broadcast scan picks the first console
/// reporting `Ok` status.
async fn resolve_console(service: &rp_core::RemotePlayService, config: &ServerConfig) -> Result<Console> {
    if let Some(ip) = config.console_ip {
        return service
            .probe(ip)
            .await
            .with_context(|| format!("No console answered at {ip}"));
    }

    log::info!("no console_ip configured, broadcasting discovery probe...");
    let discovery_cfg = rp_core::config::DiscoveryConfig {
        timeout_ms: config.discovery_timeout_ms,
        ..Default::default()
    };
    let found = rp_core::discover_broadcast(&discovery_cfg)
        .await
        .context("Discovery failed")?;
    found
        .into_iter()
        .find(|c| c.status == ConsoleStatus::Ok)
        .context("No console found on the LAN. Specify --console-ip explicitly.")
}

/// Loads valid credentials from `config.credentials_file` if present,
/// otherwise runs the registration flow (requires `--pin`/`--account-id`)
/// and persists the result for next time.
///
/// Credential persistence is explicitly out of scope for `rp-core` itself
/// (it is treated as an external store's concern) - this is that external
/// store, kept intentionally simple.
async fn obtain_credentials(
    service: &rp_core::RemotePlayService,
    config: &ServerConfig,
    console: &Console,
    args: &Args,
) -> Result<DeviceCredentials> {
    if let Some(creds) = load_credentials(&config.credentials_file) {
        if creds.is_valid() && creds.host_ip == console.ip {
            log::info!("using cached credentials from {}", config.credentials_file.display());
            return Ok(creds);
        }
        log::info!("cached credentials are stale or for a different console; re-registering");
    }

    let pin = args
        .pin
        .clone()
        .context("No valid credentials on disk and no --pin supplied for registration")?;
    let account_id = args
        .account_id
        .as_deref()
        .context("--account-id is required alongside --pin")
        .and_then(parse_account_id)?;

    log::info!("registering with console {}...", console.ip);
    let creds = service
        .register(console.ip, console.host_type, args.host_name.clone(), account_id, pin)
        .await
        .context("Registration failed")?;

    save_credentials(&config.credentials_file, &creds)
        .context("Failed to persist credentials")?;
    log::info!("registration complete, credentials saved to {}", config.credentials_file.display());
    Ok(creds)
}

fn parse_account_id(b64: &str) -> Result<[u8; 8]> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(b64)
        .context("--account-id must be valid base64")?;
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("--account-id must decode to exactly 8 bytes"))
}

fn load_credentials(path: &PathBuf) -> Option<DeviceCredentials> {
    let content = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&content).ok()
}

fn save_credentials(path: &PathBuf, creds: &DeviceCredentials) -> Result<()> {
    let content = serde_json::to_string_pretty(creds)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
