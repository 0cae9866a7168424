//! Component wiring
//!
//! [`Bridge::start`] spawns the command router, the order monitor, the feed
//! and the HTTP surface; [`Bridge::shutdown`] stops them in order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{self, AppState, BusAuth};
use crate::bus::{InProcessBus, Topic, Topics};
use crate::config::AppConfig;
use crate::coordination::{GracefulShutdown, ShutdownPhase, ShutdownSignal, ShutdownStep};
use crate::domain::TickMode;
use crate::error::{BridgeError, Result};
use crate::feed::{KiteTicker, Subscription};
use crate::gateway::{AccessToken, BrokerGateway};
use crate::services::{CommandRouter, HealthState, OrderMonitor};

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Bridge {
    bus: Arc<InProcessBus>,
    topics: Topics,
    monitor: Arc<OrderMonitor>,
    router: Arc<CommandRouter>,
    feed: Option<Arc<KiteTicker>>,
    health: Arc<HealthState>,
    shutdown: Arc<GracefulShutdown>,
    router_task: Option<JoinHandle<()>>,
    monitor_task: Option<JoinHandle<()>>,
    feed_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,
}

impl Bridge {
    /// Build and start every component.
    ///
    /// The request topic is subscribed before this returns, so commands sent
    /// afterwards are never missed.
    pub fn start(
        config: &AppConfig,
        gateway: Arc<dyn BrokerGateway>,
        bus: Arc<InProcessBus>,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|errors| BridgeError::Validation(errors.join("; ")))?;

        let topics = Topics::from_config(&config.bus);
        let (session_tx, session_rx) = watch::channel::<Option<AccessToken>>(None);

        let monitor = Arc::new(OrderMonitor::new(
            Arc::clone(&gateway),
            bus.clone(),
            &topics.event(Topic::Orders),
            config.monitor.poll_interval(),
        ));

        let router = Arc::new(CommandRouter::new(
            Arc::clone(&gateway),
            Arc::clone(&monitor),
            bus.clone(),
            topics.clone(),
            session_tx,
        ));

        let feed = if config.feed.enabled {
            let mode = config
                .feed
                .mode
                .parse::<TickMode>()
                .map_err(BridgeError::Validation)?;
            Some(Arc::new(KiteTicker::new(
                &config.feed,
                &config.kite.api_key,
                session_rx,
                Subscription::new(config.feed.instruments.clone(), mode),
                bus.clone(),
                &topics.event(Topic::Ticks),
            )))
        } else {
            info!("Market feed disabled");
            None
        };

        let health = Arc::new(HealthState::new(
            Arc::clone(&gateway),
            Arc::clone(&monitor),
            Arc::clone(&router),
            feed.clone(),
        ));
        let shutdown = Arc::new(GracefulShutdown::with_defaults());

        let commands = bus.subscribe(&topics.requests);
        let router_task = Some(tokio::spawn(Arc::clone(&router).run(commands)));
        let monitor_task = monitor.start();
        let feed_task = feed.as_ref().map(|feed| {
            let feed = Arc::clone(feed);
            tokio::spawn(async move { feed.run().await })
        });

        let server_task = if config.server.enabled {
            let app = api::create_router(AppState::new(
                Arc::clone(&health),
                bus.clone(),
                topics.clone(),
                BusAuth::from_config(&config.server),
            ));
            let mut phase = shutdown.phase_receiver();
            let host = config.server.host.clone();
            let port = config.server.port;
            Some(tokio::spawn(async move {
                let stopped = async move {
                    while *phase.borrow_and_update() != ShutdownPhase::Complete {
                        if phase.changed().await.is_err() {
                            break;
                        }
                    }
                };
                if let Err(e) = api::serve(app, &host, port, stopped).await {
                    warn!("HTTP server exited: {}", e);
                }
            }))
        } else {
            None
        };

        info!(
            "Bridge started (commands: {}, responses: {})",
            topics.requests, topics.responses
        );

        Ok(Self {
            bus,
            topics,
            monitor,
            router,
            feed,
            health,
            shutdown,
            router_task,
            monitor_task,
            feed_task,
            server_task,
        })
    }

    pub fn bus(&self) -> &Arc<InProcessBus> {
        &self.bus
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn monitor(&self) -> &Arc<OrderMonitor> {
        &self.monitor
    }

    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }

    pub fn feed(&self) -> Option<&Arc<KiteTicker>> {
        self.feed.as_ref()
    }

    pub fn health(&self) -> &Arc<HealthState> {
        &self.health
    }

    /// Coordinator to hand to signal handlers.
    pub fn shutdown_coordinator(&self) -> Arc<GracefulShutdown> {
        Arc::clone(&self.shutdown)
    }

    /// Stop everything: commands, then dispatches, then the poll timer, then the feed.
    pub async fn shutdown(mut self, signal: ShutdownSignal) -> Result<()> {
        if !self.shutdown.is_shutdown_requested() {
            self.shutdown.request_shutdown(signal);
        }
        self.health.set_shutting_down();

        let router = Arc::clone(&self.router);
        let stop_commands: ShutdownStep = Box::pin(async move { router.stop() });

        let router_task = self.router_task.take();
        let drain: ShutdownStep = Box::pin(async move {
            if let Some(task) = router_task {
                let _ = task.await;
            }
        });

        let monitor = Arc::clone(&self.monitor);
        let monitor_task = self.monitor_task.take();
        let stop_monitor: ShutdownStep = Box::pin(async move {
            monitor.stop();
            if let Some(task) = monitor_task {
                let _ = task.await;
            }
            monitor.log_status().await;
        });

        let feed = self.feed.clone();
        let feed_task = self.feed_task.take();
        let close_feed: ShutdownStep = Box::pin(async move {
            if let Some(feed) = feed {
                // stop() flips the reconnect flag before closing the socket
                feed.stop();
            }
            if let Some(task) = feed_task {
                let _ = task.await;
            }
        });

        let outcome = self
            .shutdown
            .execute(signal, stop_commands, drain, stop_monitor, close_feed)
            .await;

        if let Some(task) = self.server_task.take() {
            if tokio::time::timeout(SERVER_STOP_TIMEOUT, task).await.is_err() {
                warn!("HTTP server did not stop in time");
            }
        }

        outcome.map_err(|e| BridgeError::Internal(e.to_string()))
    }
}
