//! portbridge - local TCP port forwarding to an on-demand remote server
//!
//! Starts the remote server through its provisioning endpoint, then exposes a
//! fixed set of local ports that relay all traffic to the matching ports on
//! the provisioned host.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portbridge::config::{ConfigManager, PortMapping};
use portbridge::relay::PortForwarder;
use portbridge::{shutdown, ProvisionClient};

/// CLI arguments for portbridge
#[derive(Parser, Debug)]
#[command(name = "portbridge")]
#[command(about = "Local TCP port forwarding to an on-demand remote server")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path (defaults to portbridge.toml in the working
    /// directory, then ~/.portbridge/portbridge.toml)
    #[arg(short, long, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Forward only these ports, local and remote numbers equal
    #[arg(short, long = "port", help = "Forward only this port (repeatable)")]
    pub ports: Vec<u16>,

    /// Skip provisioning and forward straight to this host
    #[arg(long, help = "Remote host to forward to, skipping provisioning")]
    pub remote: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    init_tracing(&args)?;

    info!("Starting portbridge v{}", env!("CARGO_PKG_VERSION"));

    let mut config = ConfigManager::load_or_init(args.config.as_deref())?;
    ConfigManager::apply_env_overrides(&mut config)?;

    if !args.ports.is_empty() {
        config.forward.mappings = args.ports.iter().copied().map(PortMapping::same).collect();
        info!("CLI override: forwarding ports {:?}", args.ports);
    }

    config
        .validate()
        .context("Configuration validation failed")?;

    let remote_host = match args.remote {
        Some(host) => {
            info!("CLI override: skipping provisioning, forwarding to {}", host);
            host
        }
        None => {
            let client = ProvisionClient::new(&config.control.url, &config.control.key)?;
            client
                .resolve()
                .await
                .context("Failed to resolve the remote server address")?
        }
    };

    // Bind every listener before serving traffic so a bad mapping stops
    // startup instead of surfacing mid-run.
    let forward = Arc::new(config.forward.clone());
    let mut forwarders = Vec::new();
    for mapping in &forward.mappings {
        let local_addr = SocketAddr::new(forward.local_host, mapping.local_port);
        let remote_addr =
            resolve_host_port(&remote_host, mapping.remote_port, forward.connect_timeout).await?;
        forwarders.push(PortForwarder::bind(
            local_addr,
            remote_addr,
            Arc::clone(&forward),
        )?);
    }

    let mut listeners = JoinSet::new();
    for forwarder in forwarders {
        listeners.spawn(forwarder.run());
    }

    tokio::select! {
        result = shutdown::wait_for_shutdown_signal() => {
            result?;
            info!("Shutdown complete");
            Ok(())
        }
        result = drain_listeners(&mut listeners) => result,
    }
}

/// Wait for listener tasks; under normal operation they never finish
async fn drain_listeners(listeners: &mut JoinSet<Result<()>>) -> Result<()> {
    while let Some(joined) = listeners.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Listener failed: {:#}", e),
            Err(e) => error!("Listener task failed: {}", e),
        }
    }
    anyhow::bail!("All listeners have stopped")
}

/// Resolve the remote host name for one port mapping
async fn resolve_host_port(host: &str, port: u16, resolve_timeout: Duration) -> Result<SocketAddr> {
    let host_port = format!("{}:{}", host, port);

    let mut addrs = tokio::time::timeout(
        resolve_timeout,
        tokio::net::lookup_host(host_port.clone()),
    )
    .await
    .with_context(|| format!("DNS resolution timed out for {}", host_port))?
    .with_context(|| format!("DNS resolution failed for {}", host_port))?;

    addrs
        .next()
        .with_context(|| format!("DNS resolution returned no addresses for {}", host_port))
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
