use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub kite: KiteConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KiteConfig {
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
    /// REST API root
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Browser login page
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// Upper bound for any single brokerage call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_redirect_url() -> String {
    "http://localhost".to_string()
}

fn default_rest_url() -> String {
    "https://api.kite.trade".to_string()
}

fn default_login_url() -> String {
    "https://kite.zerodha.com/connect/login".to_string()
}

fn default_request_timeout() -> u64 {
    10_000
}

impl KiteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Inbound command topic
    #[serde(default = "default_request_topic")]
    pub request_topic: String,
    /// Outbound response topic
    #[serde(default = "default_response_topic")]
    pub response_topic: String,
    /// Prefix for the auth/orders/portfolio/ticks event topics
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,
    /// Per-topic buffer size
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_request_topic() -> String {
    "blitz.requests".to_string()
}

fn default_response_topic() -> String {
    "blitz.responses".to_string()
}

fn default_event_prefix() -> String {
    "zerodha".to_string()
}

fn default_capacity() -> usize {
    1024
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            request_topic: default_request_topic(),
            response_topic: default_response_topic(),
            event_prefix: default_event_prefix(),
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Interval between order status polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Streaming endpoint (api_key and access_token are appended)
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// Fixed delay before reconnecting in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// Instrument tokens subscribed on first connect
    #[serde(default)]
    pub instruments: Vec<u32>,
    /// ltp | quote | full
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_true() -> bool {
    true
}

fn default_ws_url() -> String {
    "wss://ws.kite.trade".to_string()
}

fn default_reconnect_delay() -> u64 {
    3000
}

fn default_ping_interval() -> u64 {
    20
}

fn default_mode() -> String {
    "ltp".to_string()
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ws_url: default_ws_url(),
            reconnect_delay_ms: default_reconnect_delay(),
            ping_interval_secs: default_ping_interval(),
            instruments: Vec::new(),
            mode: default_mode(),
        }
    }
}

impl FeedConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bind address; loopback unless the bus bridge is meant to be reachable
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token for the `/ws` bus bridge
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Reject `/ws` clients when no token is configured
    #[serde(default = "default_true")]
    pub auth_required: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            auth_token: None,
            auth_required: true,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("enabled", &self.enabled)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "***"))
            .field("auth_required", &self.auth_required)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `info,kite_bridge=debug`
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info,kite_bridge=debug".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", default_log_level())?
            .set_default("logging.json", false)?
            .set_default("monitor.poll_interval_ms", 1000)?
            .set_default("feed.reconnect_delay_ms", 3000)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("KITE_BRIDGE_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (KITE_BRIDGE__KITE__API_KEY, etc.)
            .add_source(
                Environment::with_prefix("KITE_BRIDGE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a configuration with defaults for everything but credentials
    pub fn with_credentials(api_key: &str, api_secret: &str) -> Self {
        Self {
            kite: KiteConfig {
                api_key: api_key.to_string(),
                api_secret: api_secret.to_string(),
                redirect_url: default_redirect_url(),
                rest_url: default_rest_url(),
                login_url: default_login_url(),
                request_timeout_ms: default_request_timeout(),
            },
            bus: BusConfig::default(),
            monitor: MonitorConfig::default(),
            feed: FeedConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.kite.api_key.trim().is_empty() {
            errors.push("kite.api_key must be set".to_string());
        }
        if self.kite.request_timeout_ms == 0 {
            errors.push("kite.request_timeout_ms must be positive".to_string());
        }
        if self.monitor.poll_interval_ms == 0 {
            errors.push("monitor.poll_interval_ms must be positive".to_string());
        }
        if self.feed.reconnect_delay_ms == 0 {
            errors.push("feed.reconnect_delay_ms must be positive".to_string());
        }
        if self.feed.mode.parse::<crate::domain::TickMode>().is_err() {
            errors.push(format!(
                "feed.mode '{}' must be one of ltp, quote, full",
                self.feed.mode
            ));
        }
        if self.server.enabled && self.server.host.trim().is_empty() {
            errors.push("server.host must be set".to_string());
        }
        if self.bus.request_topic == self.bus.response_topic {
            errors.push("bus.request_topic and bus.response_topic must differ".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
