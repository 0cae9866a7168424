//! Order lifecycle monitoring background service
//!
//! Orders placed through the bridge are tracked here. Each cycle fetches the
//! brokerage order book once and, for every tracked order whose status moved:
//! - emits one lifecycle event on the orders topic
//! - records the new status
//! - stops tracking the order once it reaches a terminal status

use crate::bus::{publish_or_warn, EventPublisher};
use crate::domain::{
    LifecycleEventKind, MonitoredOrder, OrderLifecycleEvent, OrderRecord, OrderSide, OrderStatus,
};
use crate::error::Result;
use crate::gateway::BrokerGateway;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Order monitoring statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorStats {
    pub polls: u64,
    pub events_emitted: u64,
    pub orders_finished: u64,
    pub poll_failures: u64,
    pub last_poll: Option<DateTime<Utc>>,
}

/// Pending status change computed from one order book snapshot.
struct Transition {
    previous: OrderStatus,
    record: OrderRecord,
}

/// Order lifecycle monitor
pub struct OrderMonitor {
    gateway: Arc<dyn BrokerGateway>,
    publisher: Arc<dyn EventPublisher>,
    topic: String,
    poll_interval: Duration,
    /// Orders being tracked, keyed by brokerage order id
    tracked: RwLock<HashMap<String, MonitoredOrder>>,
    running: AtomicBool,
    stop_signal: Notify,
    stats: RwLock<MonitorStats>,
}

impl OrderMonitor {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        publisher: Arc<dyn EventPublisher>,
        topic: &str,
        poll_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            publisher,
            topic: topic.to_string(),
            poll_interval,
            tracked: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
            stop_signal: Notify::new(),
            stats: RwLock::new(MonitorStats::default()),
        }
    }

    /// Start tracking an order. Returns false if it is already tracked.
    pub async fn track(&self, order_id: &str, symbol: &str, quantity: u32, side: OrderSide) -> bool {
        let mut tracked = self.tracked.write().await;
        if tracked.contains_key(order_id) {
            debug!("Order {} already tracked", order_id);
            return false;
        }
        tracked.insert(
            order_id.to_string(),
            MonitoredOrder::new(order_id, symbol, quantity, side),
        );
        info!(
            "Tracking order {} ({} {} x{})",
            order_id, side, symbol, quantity
        );
        true
    }

    pub async fn is_tracked(&self, order_id: &str) -> bool {
        self.tracked.read().await.contains_key(order_id)
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracked.read().await.len()
    }

    pub async fn tracked_orders(&self) -> Vec<MonitoredOrder> {
        self.tracked.read().await.values().cloned().collect()
    }

    pub async fn stats(&self) -> MonitorStats {
        self.stats.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one poll cycle and return the events it emitted.
    ///
    /// A gateway failure leaves every tracked order untouched; the next
    /// cycle simply tries again.
    pub async fn poll(&self) -> Result<Vec<OrderLifecycleEvent>> {
        let snapshot: Vec<(String, OrderStatus)> = {
            let tracked = self.tracked.read().await;
            tracked
                .values()
                .map(|o| (o.order_id.clone(), o.last_status.clone()))
                .collect()
        };

        if snapshot.is_empty() {
            debug!("No orders to poll");
            return Ok(Vec::new());
        }

        let book = match self.gateway.list_orders().await {
            Ok(book) => book,
            Err(e) => {
                let mut stats = self.stats.write().await;
                stats.polls += 1;
                stats.poll_failures += 1;
                stats.last_poll = Some(Utc::now());
                return Err(e);
            }
        };

        let mut by_id: HashMap<String, OrderRecord> = book
            .into_iter()
            .map(|record| (record.order_id.clone(), record))
            .collect();

        let transitions: Vec<Transition> = snapshot
            .into_iter()
            .filter_map(|(order_id, previous)| {
                // Orders missing from the book keep their last known status
                let record = by_id.remove(&order_id)?;
                (record.status != previous).then_some(Transition { previous, record })
            })
            .collect();

        let mut events = Vec::with_capacity(transitions.len());
        let mut finished = 0u64;

        for Transition { previous, record } in transitions {
            let event = OrderLifecycleEvent {
                event: LifecycleEventKind::classify(&previous, &record.status),
                order_id: record.order_id.clone(),
                previous_status: previous,
                current_status: record.status.clone(),
                details: record,
            };

            info!(
                "Order {} {}: {} -> {}",
                event.order_id, event.event, event.previous_status, event.current_status
            );
            publish_or_warn(self.publisher.as_ref(), &self.topic, &event).await;

            let mut tracked = self.tracked.write().await;
            if event.current_status.is_terminal() {
                tracked.remove(&event.order_id);
                finished += 1;
                debug!("Untracked order {}", event.order_id);
            } else if let Some(order) = tracked.get_mut(&event.order_id) {
                order.last_status = event.current_status.clone();
            }
            drop(tracked);

            events.push(event);
        }

        {
            let mut stats = self.stats.write().await;
            stats.polls += 1;
            stats.events_emitted += events.len() as u64;
            stats.orders_finished += finished;
            stats.last_poll = Some(Utc::now());
        }

        Ok(events)
    }

    /// Start the polling loop on its own task.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Order monitor already running");
            return None;
        }

        info!("Starting order monitor (interval: {:?})", self.poll_interval);

        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while monitor.is_running() {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = monitor.stop_signal.notified() => break,
                }

                if !monitor.gateway.is_authenticated() {
                    debug!("Skipping order poll: no brokerage session");
                    continue;
                }

                if let Err(e) = monitor.poll().await {
                    error!("Order poll failed [{}]: {}", e.kind(), e);
                }
            }

            info!("Order monitor stopped");
        }))
    }

    /// Stop the polling loop; an in-progress poll completes first.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_signal.notify_one();
            info!("Order monitor stop requested");
        }
    }

    /// Log current monitor status
    pub async fn log_status(&self) {
        let stats = self.stats().await;
        info!(
            "Order Monitor Status: tracking={}, polls={}, events={}, finished={}, failures={}, last_poll={:?}",
            self.tracked_count().await,
            stats.polls,
            stats.events_emitted,
            stats.orders_finished,
            stats.poll_failures,
            stats.last_poll
        );
    }
}
