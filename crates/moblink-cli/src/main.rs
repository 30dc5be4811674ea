//! Moblink relay CLI
//!
//! Relays a streamer's UDP media stream over this machine's uplink.

mod config;
mod platform;

use anyhow::Context;
use clap::{Parser, Subcommand};
use moblink_core::{Credentials, ManualRelays, Orchestrator, RelayContext, StatusSource};
use moblink_discovery::{
    ChannelBrowser, ChannelBrowserHandle, MdnsDiscovery, Scanner, ScannerEvent, StaticResolver,
};
use moblink_transport::SystemSocketFactory;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use config::Config;
use platform::SysfsStatus;

/// Moblink relay - forward a streamer's media over a second uplink
#[derive(Parser)]
#[command(name = "moblink-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relay for the streamers listed in the config file
    Manual,

    /// Relay for every streamer found over mDNS
    Automatic {
        /// Use this streamer instead of mDNS, `name=host:port` (repeatable)
        #[arg(short, long = "streamer", value_parser = parse_streamer)]
        streamers: Vec<(String, SocketAddr)>,
    },

    /// Show configuration and device status
    Status,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_streamer(value: &str) -> Result<(String, SocketAddr), String> {
    let (name, addr) = value
        .split_once('=')
        .ok_or_else(|| format!("expected name=host:port, got '{value}'"))?;
    if name.is_empty() {
        return Err("streamer name must not be empty".to_string());
    }
    let addr = addr.strip_prefix("ws://").unwrap_or(addr);
    let addr = addr
        .parse()
        .map_err(|e| format!("invalid address '{addr}': {e}"))?;
    Ok((name.to_string(), addr))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::Init { force } = cli.command {
        init_logging(cli.verbose, "info");
        return init_config(&config_path, force);
    }

    let config = match cli.command {
        Commands::Status => Config::load_or_default_read_only(&config_path),
        _ => Config::load_or_default(&config_path),
    }
    .with_context(|| format!("Failed to load {}", config_path.display()))?;
    config.validate()?;
    init_logging(cli.verbose, &config.logging.level);

    // Needed before the first wss:// handshake.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let status_source = Arc::new(SysfsStatus::default());
    let context = RelayContext::new(Arc::new(SystemSocketFactory::default()), status_source.clone())
        .with_timings(config.timings());

    match cli.command {
        Commands::Manual => run_manual(context, &config).await?,
        Commands::Automatic { streamers } => run_automatic(context, &config, streamers).await?,
        Commands::Status => show_status(&config, status_source.as_ref()),
        Commands::Init { .. } => {}
    }

    Ok(())
}

fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();
}

/// Write a default config with a fresh relay id
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let mut config = Config::default();
    config.ensure_relay_id();
    config.save(path)?;

    println!("Wrote {}", path.display());
    println!("Relay id: {}", config.relay.id);
    Ok(())
}

/// Run one relay per configured streamer until Ctrl+C
async fn run_manual(context: RelayContext, config: &Config) -> anyhow::Result<()> {
    let entries = config.manual_settings();
    if entries.is_empty() {
        anyhow::bail!("No streamers configured in [[manual.streamers]]");
    }

    let mut relays = ManualRelays::new(context, &config.relay.id, &config.relay.name, &entries);
    relays.set_uplink(Some(config.uplink.network()));
    relays.start_all();

    for (index, mut status) in relays.subscribe_statuses().into_iter().enumerate() {
        let url = entries[index].url.clone();
        tokio::spawn(async move {
            loop {
                println!("[{url}] {}", *status.borrow_and_update());
                if status.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    println!("Relaying for {} streamer(s). Press Ctrl+C to stop", relays.len());
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    relays.stop_all();
    for index in 0..relays.len() {
        if let Some(relay) = relays.relay(index) {
            let _ = relay.sync().await;
        }
    }
    Ok(())
}

/// Run automatic mode until Ctrl+C
async fn run_automatic(
    context: RelayContext,
    config: &Config,
    streamers: Vec<(String, SocketAddr)>,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::spawn(context);
    orchestrator.set_uplink(Some(config.uplink.network()));
    orchestrator.start(Credentials::new(
        config.relay.id.clone(),
        config.relay.name.clone(),
        config.automatic.password.clone(),
    ));

    let (scanner, events, _announcements) = start_scanner(streamers).await?;
    let follower = orchestrator.follow_scanner(events);

    let mut status = orchestrator.subscribe_status();
    let printer = tokio::spawn(async move {
        loop {
            println!("{}", *status.borrow_and_update());
            if status.changed().await.is_err() {
                break;
            }
        }
    });

    println!("Automatic mode. Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    scanner.stop();
    follower.abort();
    orchestrator.stop();
    let _ = orchestrator.relays().await;
    printer.abort();
    Ok(())
}

/// Scan with mDNS, or with the given streamers if there are any.
///
/// The returned handle keeps a static browse session open.
async fn start_scanner(
    streamers: Vec<(String, SocketAddr)>,
) -> anyhow::Result<(
    Scanner,
    mpsc::UnboundedReceiver<ScannerEvent>,
    Option<ChannelBrowserHandle>,
)> {
    if streamers.is_empty() {
        let discovery = Arc::new(MdnsDiscovery::new()?);
        let (scanner, events) = Scanner::start(discovery.as_ref(), discovery.clone()).await?;
        return Ok((scanner, events, None));
    }

    let (browser, announcements) = ChannelBrowser::channel();
    let resolver = StaticResolver::new();
    for (name, addr) in &streamers {
        resolver.insert(name.clone(), *addr);
    }
    let (scanner, events) = Scanner::start(&browser, Arc::new(resolver)).await?;
    for (name, _) in streamers {
        announcements.found(name, None).await;
    }
    Ok((scanner, events, Some(announcements)))
}

/// Show configuration and device status
fn show_status(config: &Config, status_source: &dyn StatusSource) {
    println!("Moblink Relay Status");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("Relay:");
    println!("  Id: {}", config.relay.id);
    println!("  Name: {}", config.relay.name);
    println!("  Uplink: {}", config.uplink.network());
    println!();

    println!("Manual streamers:");
    if config.manual.streamers.is_empty() {
        println!("  (none)");
    }
    for streamer in &config.manual.streamers {
        println!("  {}", streamer.url);
    }
    println!();

    let snapshot = status_source.snapshot();
    println!("Device:");
    println!("  Battery: {}%", snapshot.battery_percentage);
    match snapshot.thermal_state {
        Some(state) => println!("  Thermal: {state:?}"),
        None => println!("  Thermal: unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_streamer() {
        assert_eq!(
            parse_streamer("A=192.168.1.5:7777").unwrap(),
            ("A".to_string(), "192.168.1.5:7777".parse().unwrap())
        );
        assert_eq!(
            parse_streamer("B=ws://[fe80::1]:7777").unwrap().1,
            "[fe80::1]:7777".parse().unwrap()
        );
        assert!(parse_streamer("192.168.1.5:7777").is_err());
        assert!(parse_streamer("=192.168.1.5:7777").is_err());
        assert!(parse_streamer("A=host").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "moblink-relay",
            "-v",
            "automatic",
            "--streamer",
            "A=10.0.0.1:7777",
            "-s",
            "B=10.0.0.2:7777",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Automatic { streamers } => assert_eq!(streamers.len(), 2),
            _ => panic!("expected automatic"),
        }
    }

    #[tokio::test]
    async fn test_static_streamers_are_scanned() {
        let (scanner, mut events, announcements) =
            start_scanner(vec![("Studio".to_string(), "10.0.0.1:7777".parse().unwrap())])
                .await
                .unwrap();
        assert!(announcements.is_some());

        let event = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            ScannerEvent::Found { name, url, .. } => {
                assert_eq!(name, "Studio");
                assert_eq!(url, "ws://10.0.0.1:7777");
            }
            other => panic!("expected found, got {other:?}"),
        }
        scanner.stop();
    }
}
