//! Bridge health snapshot
//!
//! Aggregates component state for the liveness/readiness probes and the
//! `/health` JSON report.

use crate::feed::KiteTicker;
use crate::gateway::BrokerGateway;
use crate::services::command_router::CommandRouter;
use crate::services::order_monitor::{MonitorStats, OrderMonitor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    /// The worse of two statuses.
    fn worst(self, other: HealthStatus) -> HealthStatus {
        use HealthStatus::*;
        match (self, other) {
            (Unhealthy, _) | (_, Unhealthy) => Unhealthy,
            (Degraded, _) | (_, Degraded) => Degraded,
            _ => Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    fn new(name: &str, status: HealthStatus, message: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
            last_check: None,
        }
    }
}

/// Overall bridge health response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub session_active: bool,
    pub feed_connected: bool,
    pub tracked_orders: usize,
    pub in_flight_commands: usize,
    pub monitor: MonitorStats,
    pub components: Vec<ComponentHealth>,
}

/// Shared view of the running components
pub struct HealthState {
    pub started_at: DateTime<Utc>,
    gateway: Arc<dyn BrokerGateway>,
    monitor: Arc<OrderMonitor>,
    router: Arc<CommandRouter>,
    feed: Option<Arc<KiteTicker>>,
    shutting_down: AtomicBool,
}

impl HealthState {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        monitor: Arc<OrderMonitor>,
        router: Arc<CommandRouter>,
        feed: Option<Arc<KiteTicker>>,
    ) -> Self {
        Self {
            started_at: Utc::now(),
            gateway,
            monitor,
            router,
            feed,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Readiness drops as soon as shutdown starts.
    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let mut components = Vec::new();

        let session_active = self.gateway.is_authenticated();
        components.push(ComponentHealth::new(
            "brokerage_session",
            if session_active {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            (!session_active).then(|| "Not logged in".to_string()),
        ));

        let in_flight = self.router.in_flight();
        components.push(ComponentHealth::new(
            "command_router",
            if self.is_shutting_down() {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Healthy
            },
            Some(format!("{} in flight", in_flight)),
        ));

        let stats = self.monitor.stats().await;
        let tracked_orders = self.monitor.tracked_count().await;
        let mut monitor_health = ComponentHealth::new(
            "order_monitor",
            if self.monitor.is_running() {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            Some(format!("{} orders tracked", tracked_orders)),
        );
        monitor_health.last_check = stats.last_poll;
        components.push(monitor_health);

        let feed_connected = self.feed.as_ref().is_some_and(|f| f.is_connected());
        if self.feed.is_some() {
            let (status, message) = match (feed_connected, session_active) {
                (true, _) => (HealthStatus::Healthy, None),
                (false, true) => (HealthStatus::Degraded, Some("Disconnected".to_string())),
                (false, false) => (
                    HealthStatus::Degraded,
                    Some("Waiting for session".to_string()),
                ),
            };
            components.push(ComponentHealth::new("market_feed", status, message));
        }

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: Utc::now(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            session_active,
            feed_connected,
            tracked_orders,
            in_flight_commands: in_flight,
            monitor: stats,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, Topics};
    use crate::domain::OrderSide;
    use crate::gateway::mock::FakeGateway;
    use std::time::Duration;
    use tokio::sync::watch;

    fn state(gateway: Arc<FakeGateway>) -> (HealthState, Arc<OrderMonitor>, Arc<CommandRouter>) {
        let bus = Arc::new(InProcessBus::default());
        let monitor = Arc::new(OrderMonitor::new(
            gateway.clone(),
            bus.clone(),
            "zerodha.orders",
            Duration::from_secs(60),
        ));
        let (session_tx, _) = watch::channel(None);
        let router = Arc::new(CommandRouter::new(
            gateway.clone(),
            monitor.clone(),
            bus,
            Topics::default(),
            session_tx,
        ));
        (
            HealthState::new(gateway, monitor.clone(), router.clone(), None),
            monitor,
            router,
        )
    }

    #[test]
    fn worst_status_wins() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Degraded.worst(Unhealthy), Unhealthy);
        assert_eq!(Healthy.worst(Healthy), Healthy);
    }

    #[tokio::test]
    async fn stopped_monitor_is_unhealthy() {
        let (state, _, _) = state(Arc::new(FakeGateway::new()));
        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.session_active);
        assert!(!health.feed_connected);
    }

    #[tokio::test]
    async fn running_bridge_without_session_is_degraded() {
        let (state, monitor, _) = state(Arc::new(FakeGateway::logged_out()));
        let handle = monitor.start().unwrap();
        monitor.track("A1", "INFY", 1, OrderSide::Buy).await;

        let health = state.get_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.tracked_orders, 1);

        state.set_shutting_down();
        assert_eq!(state.get_health().await.status, HealthStatus::Unhealthy);

        monitor.stop();
        handle.await.unwrap();
    }
}
