use thiserror::Error;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Command errors (reported back on the response topic)
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not logged in. Send LOGIN command first.")]
    Unauthenticated,

    #[error("Unrecognized command: {0}")]
    UnknownCommand(String),

    // Brokerage errors
    #[error("Gateway error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Gateway {
        status: Option<u16>,
        message: String,
    },

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    // Feed errors (recovered locally, never surfaced to a caller)
    #[error("Malformed tick frame: {0}")]
    Decode(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn gateway(message: impl Into<String>) -> Self {
        BridgeError::Gateway {
            status: None,
            message: message.into(),
        }
    }

    /// Stable tag for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG",
            BridgeError::Validation(_) => "VALIDATION",
            BridgeError::Unauthenticated => "UNAUTHENTICATED",
            BridgeError::UnknownCommand(_) => "UNKNOWN_COMMAND",
            BridgeError::Gateway { .. } | BridgeError::Http(_) => "GATEWAY",
            BridgeError::WebSocket(_) => "WEBSOCKET",
            BridgeError::Decode(_) => "DECODE",
            BridgeError::Json(_) => "JSON",
            BridgeError::Io(_) => "IO",
            BridgeError::Internal(_) | BridgeError::Other(_) => "INTERNAL",
        }
    }

    /// Errors raised before any brokerage call was attempted.
    pub fn is_rejected_locally(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_) | BridgeError::Unauthenticated | BridgeError::UnknownCommand(_)
        )
    }
}

/// Result type alias for BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
