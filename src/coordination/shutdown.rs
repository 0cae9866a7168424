//! Graceful Shutdown Handler
//!
//! Stops the bridge in a fixed order: the command intake closes first,
//! in-flight dispatches drain, the poll timer stops, and the feed is closed
//! last with reconnects already disabled.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - skip the drain wait
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown
    pub total_timeout_secs: u64,
    /// Time to wait for in-flight dispatches to answer
    pub drain_timeout_secs: u64,
    /// Time to wait for the poll loop to exit
    pub monitor_stop_timeout_secs: u64,
    /// Time to wait for the feed connection to close
    pub feed_close_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 60,
            drain_timeout_secs: 30,
            monitor_stop_timeout_secs: 10,
            feed_close_timeout_secs: 10,
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Running,
    /// No new commands are taken from the bus
    StoppingCommands,
    /// Waiting for in-flight dispatches to publish their responses
    DrainingDispatches,
    StoppingMonitor,
    ClosingFeed,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingCommands => write!(f, "stopping_commands"),
            ShutdownPhase::DrainingDispatches => write!(f, "draining_dispatches"),
            ShutdownPhase::StoppingMonitor => write!(f, "stopping_monitor"),
            ShutdownPhase::ClosingFeed => write!(f, "closing_feed"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Boxed step passed to [`GracefulShutdown::execute`]
pub type ShutdownStep = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    phase: Arc<watch::Sender<ShutdownPhase>>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
}

impl GracefulShutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            phase: Arc::new(phase_tx),
            phase_rx,
            signal_tx,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    pub fn phase_receiver(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase_rx.clone()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    /// Wait until shutdown is requested
    pub async fn wait_for_signal(&self) -> ShutdownSignal {
        let mut rx = self.subscribe();
        if self.is_shutdown_requested() {
            return ShutdownSignal::Graceful;
        }
        rx.recv().await.unwrap_or(ShutdownSignal::Urgent)
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let _ = self.phase.send(phase);
        info!("Shutdown phase: {}", phase);
    }

    async fn bounded(&self, step: ShutdownStep, timeout_secs: u64, what: &str) {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), step).await {
            Ok(()) => debug!("{} done", what),
            Err(_) => warn!("{} timed out after {}s, proceeding anyway", what, timeout_secs),
        }
    }

    /// Execute the shutdown sequence
    ///
    /// 1. Stop taking commands from the bus
    /// 2. Wait for in-flight dispatches (skipped on urgent shutdown)
    /// 3. Stop the order poll timer
    /// 4. Close the feed; the step must disable reconnects before closing
    pub async fn execute(
        &self,
        signal: ShutdownSignal,
        stop_commands: ShutdownStep,
        drain_dispatches: ShutdownStep,
        stop_monitor: ShutdownStep,
        close_feed: ShutdownStep,
    ) -> Result<(), ShutdownError> {
        let start = std::time::Instant::now();
        let total_timeout = Duration::from_secs(self.config.total_timeout_secs);

        info!(
            "Starting {} shutdown (timeout: {}s)",
            signal, self.config.total_timeout_secs
        );

        self.set_phase(ShutdownPhase::StoppingCommands);
        stop_commands.await;

        self.set_phase(ShutdownPhase::DrainingDispatches);
        if signal == ShutdownSignal::Urgent {
            warn!("Urgent shutdown: not waiting for in-flight dispatches");
        } else {
            self.bounded(
                drain_dispatches,
                self.config.drain_timeout_secs,
                "Dispatch drain",
            )
            .await;
        }

        let over_budget = start.elapsed() > total_timeout;
        if over_budget {
            error!("Total shutdown timeout exceeded; stopping remaining components");
        }

        self.set_phase(ShutdownPhase::StoppingMonitor);
        self.bounded(
            stop_monitor,
            self.config.monitor_stop_timeout_secs,
            "Monitor stop",
        )
        .await;

        self.set_phase(ShutdownPhase::ClosingFeed);
        self.bounded(close_feed, self.config.feed_close_timeout_secs, "Feed close")
            .await;

        self.set_phase(ShutdownPhase::Complete);
        info!("Shutdown completed in {:?}", start.elapsed());

        if over_budget {
            Err(ShutdownError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown timed out")]
    Timeout,
}

/// Install OS signal handlers that request shutdown
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, kind_signal) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(kind_signal);
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}
