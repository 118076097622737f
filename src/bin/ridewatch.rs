use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use ridewatch::config::{AppConfig, CONFIG_PATH, Credentials, TelegramConfig};
use ridewatch::engine::Engine;
use ridewatch::notify::Notifier;
use ridewatch::settings::{FileSettings, Settings};

#[derive(Parser)]
#[command(name = "ridewatch", about = "Ride-dispatch portal monitor and auto-claimer")]
struct Args {
    /// Path to the static config file
    #[arg(long, default_value = CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = if args.config.exists() {
        let config = AppConfig::load(&args.config)?;
        info!("loaded config from {}", args.config.display());
        config
    } else {
        info!("no config file at {}; using defaults", args.config.display());
        AppConfig::default()
    };

    let credentials = Credentials::from_env()?;
    let defaults = Settings::defaults_from_env()?;
    let settings = FileSettings::new(&config.watch.settings_path, defaults)?;
    info!("runtime settings at {}", settings.path().display());

    let telegram = TelegramConfig::from_env();
    if telegram.is_none() {
        info!("TELEGRAM_BOT_TOKEN not set; notifications disabled");
    }
    let notifier = Notifier::new(telegram);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let engine = Engine::new(&config, credentials, settings, notifier, shutdown_rx);
    engine.run().await;

    Ok(())
}
