use clap::{Parser, Subcommand};

use crate::domain::Tick;
use crate::error::{BridgeError, Result};
use crate::feed::decode;

#[derive(Parser)]
#[command(name = "kite-bridge")]
#[command(version)]
#[command(about = "Command-bus bridge to the Kite brokerage API", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config directory (default.toml plus an optional per-environment file)
    #[arg(short, long, default_value = "config", env = "KITE_BRIDGE_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the bridge until interrupted (default)
    Run,
    /// Print the browser login URL
    LoginUrl,
    /// Decode a hex-encoded feed frame and print the ticks as JSON
    Decode {
        /// Frame bytes as hex; whitespace is ignored
        hex: String,
    },
}

/// Decode a frame given as hex text.
pub fn decode_hex_frame(input: &str) -> Result<Vec<Tick>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact.trim_start_matches("0x");
    let frame = hex::decode(compact).map_err(|e| BridgeError::Decode(format!("invalid hex: {e}")))?;
    Ok(decode(&frame))
}
