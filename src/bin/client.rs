//! AudioLAN Client
//!
//! Asks a server for its audio feed and plays it on the local output device,
//! reconnecting whenever the connection drops.
//!
//! Usage: `audiolan-client <server-address> [config.toml]`

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use audiolan::{audio::backend_from_config, client::Client, config::AppConfig};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let Some(address) = args.next() else {
        bail!("usage: audiolan-client <server-address> [config.toml]");
    };
    let config_path = args.next().map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;
    config.validate()?;

    tracing::info!("Starting AudioLAN client for {}", address);

    let client = Arc::new(Client::new(&config, backend_from_config(&config.audio)));
    tokio::spawn(report_progress(client.clone()));

    tokio::select! {
        _ = reconnect_loop(&client, &address) => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C");
            client.disconnect().await;
        }
    }

    tracing::info!(
        "Client stopped, {:.1} KB received",
        client.bytes_received() as f64 / 1024.0
    );
    Ok(())
}

async fn reconnect_loop(client: &Client, address: &str) {
    loop {
        match client.connect_to(address).await {
            Ok(reason) => tracing::info!("Session ended: {:?}", reason),
            Err(e) => tracing::warn!("Failed to connect to {}: {}", address, e),
        }
        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

/// Log progress once per second while connected
async fn report_progress(client: Arc<Client>) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    loop {
        interval.tick().await;
        if !client.is_connected() {
            continue;
        }
        let (dropped, underruns) = client
            .report()
            .map_or((0, 0), |r| (r.frames_dropped, r.underruns));
        tracing::info!(
            "{:.1} KB received in {:.0}s ({} dropped, {} underruns)",
            client.bytes_received() as f64 / 1024.0,
            client.connected_secs(),
            dropped,
            underruns
        );
    }
}
