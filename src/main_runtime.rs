use kite_bridge::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber for the long-running bridge.
///
/// `RUST_LOG` overrides the configured filter. File logging is enabled when
/// `KITE_BRIDGE_LOG_DIR` points at a writable directory; keep the returned
/// guard alive so buffered lines are flushed on exit.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info,kite_bridge=debug"));

    let log_dir = std::env::var("KITE_BRIDGE_LOG_DIR").ok();

    // `rolling::daily` panics if it can't create the initial file, so preflight writability
    let (file_layer, guard) = match log_dir.as_deref().map(preflight_log_dir) {
        Some(Ok(dir)) => {
            let file_appender = tracing_appender::rolling::daily(dir, "kite-bridge.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        Some(Err(e)) => {
            eprintln!("Warning: {}, file logging disabled", e);
            (None, None)
        }
        None => (None, None),
    };

    let json_layer = config
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_target(true));
    let console_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, log_dir) {
        eprintln!("Logging to: {}/kite-bridge.log", dir);
    }

    guard
}

fn preflight_log_dir(dir: &str) -> Result<&str, String> {
    std::fs::create_dir_all(dir).map_err(|e| format!("could not create log directory {dir} ({e})"))?;
    let test_path = std::path::Path::new(dir).join(".kite_bridge_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)
        .map_err(|e| format!("could not write to log directory {dir} ({e})"))?;
    let _ = std::fs::remove_file(&test_path);
    Ok(dir)
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot CLI commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .try_init();
}
