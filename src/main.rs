use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::info;

mod activity;
mod config;
mod coordinator;
mod entity;
mod error;
mod manager;
mod messages;
mod mower;
mod mqtt;
mod protocol;
mod scanner;
#[cfg(test)]
mod testing;

/// Bridges a Husqvarna Automower on Bluetooth LE to Home Assistant over MQTT.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let config = config::AppConfig::load(&cli.config)?;
    info!("Mower: {} (channel {})", config.mower.address, config.mower.channel_id);

    let bt_manager = Manager::new().await?;

    // get the first bluetooth adapter
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .next()
        .context("no bluetooth adapter found")?;

    let scanner = scanner::BleScanner::new(central, config.scan_timeout());
    let mower = mower::Mower::new(config.mower.channel_id, config.mower.response_timeout());

    let coordinator = coordinator::setup_entry(
        mower,
        scanner,
        config.mower.address,
        config.mower.channel_id,
    )
    .await?
    .with_update_interval(config.mower.poll_interval());

    let (core, eventloop) = manager::Manager::new(coordinator, &config.mqtt);
    core.run_loop(eventloop).await?;

    Ok(())
}
