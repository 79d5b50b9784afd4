//! Audio Relay Server
//!
//! Accepts audio packets from producers over UDP and serves each session's
//! reconstructed stream to HTTP consumers.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloud_audio_relay::{
    config::AppConfig,
    network::AudioReceiver,
    session::SessionRegistry,
    ui::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "relay-server", about = "Real-time UDP audio relay")]
struct Args {
    /// Config file; defaults to the platform config directory
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// UDP port for audio packets
    #[arg(long)]
    data_port: Option<u16>,
    /// HTTP port for signalling and audio
    #[arg(long)]
    signal_port: Option<u16>,
    /// Host producers are told to send packets to
    #[arg(long)]
    advertised_host: Option<String>,
    /// Log every received packet
    #[arg(long)]
    echo_packets: bool,
    /// Seconds between stats log lines; 0 disables them
    #[arg(long, default_value_t = 10)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting audio relay");

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    if let Some(port) = args.data_port {
        config.network.udp_port = port;
    }
    if let Some(port) = args.signal_port {
        config.ui.http_port = port;
    }
    if let Some(host) = args.advertised_host {
        config.network.advertised_host = host;
    }
    config.network.echo_packets |= args.echo_packets;
    config.validate().context("invalid configuration")?;

    let registry = Arc::new(SessionRegistry::new(config.session.clone()));

    // Start UDP ingress
    let receiver = AudioReceiver::bind(&config.network, registry.clone())
        .context("binding UDP data socket")?;
    let data_port = receiver.local_addr()?.port();
    let ingress_stats = receiver.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingress = tokio::spawn(receiver.run(shutdown_rx.clone()));

    tracing::info!("Network receiver started on port {}", data_port);

    // Periodic stats
    if args.stats_interval > 0 {
        let registry = registry.clone();
        let ingress_stats = ingress_stats.clone();
        let mut shutdown = shutdown_rx.clone();
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {
                        let snapshot = ingress_stats.snapshot();
                        tracing::info!(
                            sessions = registry.len(),
                            packets = snapshot.packets_received,
                            invalid = snapshot.invalid_packets,
                            unknown = snapshot.unknown_session,
                            dropped = snapshot.dropped,
                            "Relay stats"
                        );
                    }
                }
            }
        });
    }

    // Start HTTP signalling and egress
    let state = AppState::new(registry.clone(), config.clone())
        .with_data_port(data_port)
        .with_ingress(ingress_stats);
    let mut http_shutdown = shutdown_rx.clone();
    let web_handle = WebServer::new(state).start_background(async move {
        let _ = http_shutdown.changed().await;
    });

    tracing::info!(
        "Signalling available at http://{}:{}",
        config.ui.bind_address,
        config.ui.http_port
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    shutdown_tx.send_replace(true);
    registry.shutdown();

    let _ = ingress.await;
    match web_handle.await {
        Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
        Err(e) => tracing::error!("HTTP server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    tracing::info!("Goodbye!");
    Ok(())
}
