use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Streaming feed subscription mode, which also fixes the sub-packet size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TickMode {
    Ltp,
    Quote,
    Full,
}

impl TickMode {
    /// Value used in `{"a":"mode"}` control messages.
    pub fn as_wire(&self) -> &'static str {
        match self {
            TickMode::Ltp => "ltp",
            TickMode::Quote => "quote",
            TickMode::Full => "full",
        }
    }

    /// Sub-packet length for this mode.
    pub fn packet_len(&self) -> usize {
        match self {
            TickMode::Ltp => 8,
            TickMode::Quote => 44,
            TickMode::Full => 184,
        }
    }

    pub fn from_packet_len(len: usize) -> Option<Self> {
        match len {
            8 => Some(TickMode::Ltp),
            44 => Some(TickMode::Quote),
            184 => Some(TickMode::Full),
            _ => None,
        }
    }
}

impl std::fmt::Display for TickMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickMode::Ltp => write!(f, "LTP"),
            TickMode::Quote => write!(f, "QUOTE"),
            TickMode::Full => write!(f, "FULL"),
        }
    }
}

impl FromStr for TickMode {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ltp" => Ok(TickMode::Ltp),
            "quote" => Ok(TickMode::Quote),
            "full" => Ok(TickMode::Full),
            other => Err(format!("invalid tick mode '{other}'; expected ltp|quote|full")),
        }
    }
}

/// One instrument's price snapshot decoded from a feed frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument_token: u32,
    pub mode: TickMode,
    pub last_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<u32>,
}
