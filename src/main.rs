mod main_runtime;

use anyhow::Context;
use clap::Parser;
use kite_bridge::cli::{self, Cli, Commands};
use kite_bridge::coordination::install_signal_handlers;
use kite_bridge::{AppConfig, Bridge, BrokerGateway, InProcessBus, KiteClient};
use main_runtime::{init_logging, init_logging_simple};
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Decode { ref hex }) => {
            init_logging_simple();
            let ticks = cli::decode_hex_frame(hex)?;
            println!("{}", serde_json::to_string_pretty(&ticks)?);
        }
        Some(Commands::LoginUrl) => {
            init_logging_simple();
            let config = load_config(&cli.config)?;
            let client = KiteClient::new(&config.kite)?;
            println!("{}", client.login_url());
        }
        None | Some(Commands::Run) => {
            let config = load_config(&cli.config)?;
            let _log_guard = init_logging(&config.logging);
            run_bridge(config).await?;
        }
    }

    Ok(())
}

fn load_config(dir: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load_from(dir)
        .with_context(|| format!("failed to load configuration from {dir}"))?;
    if let Err(errors) = config.validate() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(config)
}

async fn run_bridge(config: AppConfig) -> anyhow::Result<()> {
    info!("Starting kite-bridge v{}", env!("CARGO_PKG_VERSION"));

    let gateway = Arc::new(KiteClient::new(&config.kite)?);
    info!("Login URL: {}", gateway.login_url());

    let bus = Arc::new(InProcessBus::new(config.bus.capacity));
    let bridge = Bridge::start(&config, gateway, bus)?;

    let coordinator = bridge.shutdown_coordinator();
    install_signal_handlers(Arc::clone(&coordinator));
    let signal = coordinator.wait_for_signal().await;

    if let Err(e) = bridge.shutdown(signal).await {
        error!("Shutdown finished with errors: {}", e);
    }
    Ok(())
}
