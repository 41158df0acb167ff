//! AudioLAN Server
//!
//! Serves this computer's capture device to listeners that connect over the
//! handshake endpoint.
//!
//! Usage: `audiolan-server [config.toml]`

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiolan::{
    audio::{backend_from_config, list_devices, StreamParams},
    config::AppConfig,
    handshake::HandshakeServer,
    session::{Direction, SessionRegistry},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting AudioLAN server");

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    config.validate()?;

    println!("\n=== Available Input Devices ===");
    for device in list_devices().iter().filter(|d| d.is_input) {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}", device.name, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();

    let backend = backend_from_config(&config.audio);
    tracing::info!(
        "Capturing from {} backend: {}Hz, {} channel(s), {} samples/frame ({:?})",
        backend.name(),
        config.audio.sample_rate,
        config.audio.channels,
        config.audio.frame_length,
        config.audio.frame_period()
    );

    let registry = Arc::new(SessionRegistry::new(
        Direction::Capture,
        backend,
        StreamParams::new(&config.audio, &config.session),
        config.session.clone(),
    ));

    let server = HandshakeServer::new(registry.clone(), config.network.clone());
    let listener = server.bind().await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(report_sessions(registry, shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C");
            }
            shutdown.cancel();
        }
    });

    server.serve(listener, shutdown).await?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Log every live session once per second
async fn report_sessions(registry: Arc<SessionRegistry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for report in registry.reports() {
            tracing::info!(
                "{}: {:.1} KB sent in {:.0}s ({} silent frames skipped, {} dropped, {} recent failures)",
                report.peer,
                report.bytes_transferred as f64 / 1024.0,
                report.elapsed_secs,
                report.silent_frames_skipped,
                report.frames_dropped,
                report.recent_failures
            );
        }
    }
}
