//! Command router
//!
//! Bridges the asynchronous request topic to synchronous brokerage calls.
//! Every inbound envelope is dispatched on its own task and answered with
//! exactly one response carrying the same `request_id`.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bus::{publish_or_warn, EventPublisher, Topic, Topics};
use crate::domain::{Action, CommandEnvelope, ModifyParams, OrderParams, ResponseEnvelope};
use crate::error::{BridgeError, Result};
use crate::gateway::{AccessToken, BrokerGateway};
use crate::services::order_mapping;
use crate::services::order_monitor::OrderMonitor;

/// A validated command, ready for the gateway.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    GetLoginUrl,
    Login { request_token: String },
    Logout,
    PlaceOrder(OrderParams),
    ModifyOrder(ModifyParams),
    CancelOrder { order_id: String },
    GetOrders,
    GetHoldings,
    GetPositions,
}

impl Command {
    fn parse(action: Action, data: &Value) -> Result<Self> {
        Ok(match action {
            Action::GetLoginUrl => Command::GetLoginUrl,
            Action::Login => Command::Login {
                request_token: order_mapping::map_login(data)?,
            },
            Action::Logout => Command::Logout,
            Action::PlaceOrder => Command::PlaceOrder(order_mapping::map_place_order(data)?),
            Action::ModifyOrder => Command::ModifyOrder(order_mapping::map_modify_order(data)?),
            Action::CancelOrder => Command::CancelOrder {
                order_id: order_mapping::map_cancel_order(data)?,
            },
            Action::GetOrders => Command::GetOrders,
            Action::GetHoldings => Command::GetHoldings,
            Action::GetPositions => Command::GetPositions,
        })
    }
}

pub struct CommandRouter {
    gateway: Arc<dyn BrokerGateway>,
    monitor: Arc<OrderMonitor>,
    publisher: Arc<dyn EventPublisher>,
    topics: Topics,
    session: watch::Sender<Option<AccessToken>>,
    in_flight: AtomicUsize,
    stop_tx: watch::Sender<bool>,
}

impl CommandRouter {
    pub fn new(
        gateway: Arc<dyn BrokerGateway>,
        monitor: Arc<OrderMonitor>,
        publisher: Arc<dyn EventPublisher>,
        topics: Topics,
        session: watch::Sender<Option<AccessToken>>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            gateway,
            monitor,
            publisher,
            topics,
            session,
            in_flight: AtomicUsize::new(0),
            stop_tx,
        }
    }

    /// Dispatches currently executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Execute one command and build its response. Never fails; errors are
    /// reported inside the envelope.
    pub async fn dispatch(&self, envelope: CommandEnvelope) -> ResponseEnvelope {
        info!("-> {} [{}]", envelope.action, envelope.request_id);

        let outcome = match envelope.action.parse::<Action>() {
            Ok(action) => self.execute(action, &envelope.data).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(data) => {
                debug!("<- {} [{}] SUCCESS", envelope.action, envelope.request_id);
                ResponseEnvelope::success(&envelope.request_id, data)
            }
            Err(e) => {
                if e.is_rejected_locally() {
                    warn!(
                        "<- {} [{}] rejected [{}]: {}",
                        envelope.action,
                        envelope.request_id,
                        e.kind(),
                        e
                    );
                } else {
                    error!(
                        "<- {} [{}] failed [{}]: {}",
                        envelope.action,
                        envelope.request_id,
                        e.kind(),
                        e
                    );
                }
                ResponseEnvelope::failure(&envelope.request_id, &e)
            }
        }
    }

    /// Decode and dispatch a raw bus message.
    ///
    /// Returns `None` only when the message is so malformed that no
    /// `request_id` can be recovered to answer it.
    pub async fn handle_raw(&self, raw: &str) -> Option<ResponseEnvelope> {
        match CommandEnvelope::parse(raw) {
            Ok(envelope) => Some(self.dispatch(envelope).await),
            Err((Some(request_id), e)) => {
                warn!("Malformed command [{}]: {}", request_id, e);
                Some(ResponseEnvelope::failure(&request_id, &e))
            }
            Err((None, e)) => {
                error!("Dropping undecodable command: {}", e);
                None
            }
        }
    }

    async fn execute(&self, action: Action, data: &Value) -> Result<Value> {
        let command = Command::parse(action, data)?;

        if action.requires_session() && !self.gateway.is_authenticated() {
            return Err(BridgeError::Unauthenticated);
        }

        match command {
            Command::GetLoginUrl => Ok(json!({ "login_url": self.gateway.login_url() })),

            Command::Login { request_token } => {
                let session = self.gateway.login(&request_token).await?;
                self.session.send_replace(Some(session.access_token.clone()));

                self.publish(
                    Topic::Auth,
                    json!({ "event": "LOGIN_SUCCESS", "user_id": session.user_id }),
                )
                .await;
                info!("Login successful (user: {:?})", session.user_id);
                Ok(json!({ "message": "Login successful", "user_id": session.user_id }))
            }

            Command::Logout => {
                self.gateway.logout().await?;
                self.session.send_replace(None);
                self.publish(Topic::Auth, json!({ "event": "LOGOUT" })).await;
                info!("Logged out");
                Ok(json!({ "message": "Logged out successfully" }))
            }

            Command::PlaceOrder(params) => {
                let response = self.gateway.place_order(&params).await?;

                match order_mapping::extract_order_id(&response) {
                    Some(order_id) => {
                        self.monitor
                            .track(
                                &order_id,
                                &params.tradingsymbol,
                                params.quantity,
                                params.transaction_type,
                            )
                            .await;
                    }
                    None => warn!("Placement response carried no order_id; not monitoring"),
                }

                self.publish(
                    Topic::Orders,
                    json!({ "event": "ORDER_PLACED_REQ", "request": params, "response": response }),
                )
                .await;
                Ok(response)
            }

            Command::ModifyOrder(params) => {
                let response = self.gateway.modify_order(&params).await?;
                self.publish(
                    Topic::Orders,
                    json!({
                        "event": "ORDER_MODIFY_REQ",
                        "order_id": params.order_id,
                        "response": response
                    }),
                )
                .await;
                Ok(response)
            }

            Command::CancelOrder { order_id } => {
                let response = self.gateway.cancel_order(&order_id).await?;
                self.publish(
                    Topic::Orders,
                    json!({ "event": "ORDER_CANCEL_REQ", "order_id": order_id, "response": response }),
                )
                .await;
                Ok(response)
            }

            Command::GetOrders => {
                let orders = serde_json::to_value(self.gateway.list_orders().await?)?;
                self.publish(
                    Topic::Orders,
                    json!({ "event": "ORDERS_FETCHED", "response": orders }),
                )
                .await;
                Ok(orders)
            }

            Command::GetHoldings => {
                let holdings = self.gateway.get_holdings().await?;
                self.publish(
                    Topic::Portfolio,
                    json!({ "event": "HOLDINGS_FETCHED", "response": holdings }),
                )
                .await;
                Ok(holdings)
            }

            Command::GetPositions => {
                let positions = self.gateway.get_positions().await?;
                self.publish(
                    Topic::Portfolio,
                    json!({ "event": "POSITIONS_FETCHED", "response": positions }),
                )
                .await;
                Ok(positions)
            }
        }
    }

    async fn publish(&self, topic: Topic, event: Value) {
        publish_or_warn(self.publisher.as_ref(), &self.topics.event(topic), &event).await;
    }

    async fn process(&self, raw: String) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = self.handle_raw(&raw).await {
            publish_or_warn(self.publisher.as_ref(), &self.topics.responses, &response).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Consume commands until [`CommandRouter::stop`], then wait for every
    /// in-flight dispatch to publish its response.
    pub async fn run(self: Arc<Self>, mut commands: broadcast::Receiver<String>) {
        let mut stop = self.stop_tx.subscribe();
        let mut dispatches = JoinSet::new();

        info!("Command router listening on {}", self.topics.requests);

        if !*stop.borrow_and_update() {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    msg = commands.recv() => match msg {
                        Ok(raw) => {
                            let router = Arc::clone(&self);
                            dispatches.spawn(async move { router.process(raw).await });
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Command router lagged; {} commands were dropped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Command topic closed");
                            break;
                        }
                    },
                    Some(joined) = dispatches.join_next(), if !dispatches.is_empty() => {
                        if let Err(e) = joined {
                            error!("Dispatch task failed: {}", e);
                        }
                    }
                }
            }
        }

        if !dispatches.is_empty() {
            info!("Draining {} in-flight dispatches", dispatches.len());
        }
        while let Some(joined) = dispatches.join_next().await {
            if let Err(e) = joined {
                error!("Dispatch task failed: {}", e);
            }
        }

        info!("Command router stopped");
    }

    /// Stop taking new commands; in-flight dispatches still complete.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("Command router stop requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InProcessBus;
    use crate::domain::{OrderSide, ResponseStatus, Validity};
    use crate::gateway::mock::FakeGateway;
    use crate::gateway::MockBrokerGateway;
    use std::time::Duration;

    struct Harness {
        router: Arc<CommandRouter>,
        monitor: Arc<OrderMonitor>,
        bus: Arc<InProcessBus>,
        session: watch::Receiver<Option<AccessToken>>,
    }

    fn harness(gateway: Arc<dyn BrokerGateway>) -> Harness {
        let bus = Arc::new(InProcessBus::default());
        let topics = Topics::default();
        let monitor = Arc::new(OrderMonitor::new(
            Arc::clone(&gateway),
            bus.clone(),
            &topics.event(Topic::Orders),
            Duration::from_secs(1),
        ));
        let (session_tx, session) = watch::channel(None);
        let router = Arc::new(CommandRouter::new(
            gateway,
            monitor.clone(),
            bus.clone(),
            topics,
            session_tx,
        ));
        Harness {
            router,
            monitor,
            bus,
            session,
        }
    }

    fn env(id: &str, action: &str, data: Value) -> CommandEnvelope {
        CommandEnvelope::new(id, action, data)
    }

    #[tokio::test]
    async fn unknown_action_never_reaches_gateway() {
        // no expectations: any gateway call panics
        let h = harness(Arc::new(MockBrokerGateway::new()));
        let resp = h.router.dispatch(env("r1", "FOO", json!({}))).await;

        assert_eq!(resp.request_id, "r1");
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(resp.error.as_deref(), Some("Unrecognized command: FOO"));
    }

    #[tokio::test]
    async fn incomplete_place_order_fails_validation_first() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_place_order().never();
        gw.expect_is_authenticated().return_const(true);
        let h = harness(Arc::new(gw));

        let resp = h
            .router
            .dispatch(env("r2", "PLACE_ORDER", json!({"quantity": 10})))
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert!(resp.error.unwrap().starts_with("Validation failed"));
        assert_eq!(h.monitor.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn data_commands_require_a_session() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_is_authenticated().return_const(false);
        gw.expect_list_orders().never();
        gw.expect_place_order().never();
        let h = harness(Arc::new(gw));

        for action in ["GET_ORDERS", "GET_HOLDINGS", "GET_POSITIONS", "CANCEL_ORDER"] {
            let resp = h
                .router
                .dispatch(env("r3", action, json!({"order_id": "1"})))
                .await;
            assert_eq!(
                resp.error.as_deref(),
                Some("Not logged in. Send LOGIN command first."),
                "{action}"
            );
        }
    }

    #[tokio::test]
    async fn place_order_maps_fields_and_tracks_before_responding() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_is_authenticated().return_const(true);
        gw.expect_place_order()
            .withf(|p| {
                p.exchange == "NSE"
                    && p.tradingsymbol == "INFY"
                    && p.quantity == 10
                    && p.transaction_type == OrderSide::Buy
                    && p.validity == Validity::Day
            })
            .times(1)
            .returning(|_| Ok(json!({"order_id": "230101000000001"})));
        let h = harness(Arc::new(gw));
        let mut orders = h.bus.subscribe("zerodha.orders");

        let resp = h
            .router
            .dispatch(env(
                "r4",
                "PLACE_ORDER",
                json!({"symbol": "NSE|INFY", "quantity": 10, "orderSide": "BUY"}),
            ))
            .await;

        assert!(resp.is_success());
        assert_eq!(resp.data.unwrap()["order_id"], "230101000000001");
        assert!(h.monitor.is_tracked("230101000000001").await);

        let event: Value = serde_json::from_str(&orders.recv().await.unwrap()).unwrap();
        assert_eq!(event["event"], "ORDER_PLACED_REQ");
        assert_eq!(event["request"]["tradingsymbol"], "INFY");
    }

    #[tokio::test]
    async fn placement_without_order_id_is_not_an_error() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_is_authenticated().return_const(true);
        gw.expect_place_order()
            .returning(|_| Ok(json!({"message": "queued"})));
        let h = harness(Arc::new(gw));

        let resp = h
            .router
            .dispatch(env("r5", "PLACE_ORDER", json!({"symbol": "INFY", "quantity": 1})))
            .await;
        assert!(resp.is_success());
        assert_eq!(h.monitor.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn gateway_errors_become_error_responses() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_is_authenticated().return_const(true);
        gw.expect_cancel_order().returning(|_| {
            Err(BridgeError::Gateway {
                status: Some(400),
                message: "Order cannot be cancelled".into(),
            })
        });
        let h = harness(Arc::new(gw));

        let resp = h
            .router
            .dispatch(env("r6", "CANCEL_ORDER", json!({"order_id": "99"})))
            .await;
        assert_eq!(resp.status, ResponseStatus::Error);
        assert_eq!(
            resp.error.as_deref(),
            Some("Gateway error (HTTP 400): Order cannot be cancelled")
        );
    }

    #[tokio::test]
    async fn login_publishes_session_without_token() {
        let h = harness(Arc::new(FakeGateway::logged_out()));
        let mut auth = h.bus.subscribe("zerodha.auth");

        let resp = h
            .router
            .dispatch(env("r7", "LOGIN", json!({"request_token": "rt-123456789"})))
            .await;
        assert!(resp.is_success());
        assert_eq!(
            h.session.borrow().as_ref().map(|t| t.expose().to_string()),
            Some("fake-access-token".to_string())
        );

        let raw = auth.recv().await.unwrap();
        assert!(!raw.contains("fake-access-token"));
        let event: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(event["event"], "LOGIN_SUCCESS");
        assert_eq!(event["user_id"], "AB1234");

        let resp = h.router.dispatch(env("r8", "LOGOUT", json!(null))).await;
        assert!(resp.is_success());
        assert!(h.session.borrow().is_none());
        let event: Value = serde_json::from_str(&auth.recv().await.unwrap()).unwrap();
        assert_eq!(event["event"], "LOGOUT");
    }

    #[tokio::test]
    async fn login_requires_request_token() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_login().never();
        let h = harness(Arc::new(gw));
        let resp = h.router.dispatch(env("r9", "LOGIN", json!({}))).await;
        assert_eq!(
            resp.error.as_deref(),
            Some("Validation failed: missing required field 'request_token'")
        );
    }

    #[tokio::test]
    async fn login_url_needs_no_session() {
        let mut gw = MockBrokerGateway::new();
        gw.expect_login_url()
            .return_const("https://kite.zerodha.com/connect/login?v=3&api_key=k".to_string());
        let h = harness(Arc::new(gw));
        let resp = h.router.dispatch(env("r10", "GET_LOGIN_URL", Value::Null)).await;
        assert_eq!(
            resp.data.unwrap()["login_url"],
            "https://kite.zerodha.com/connect/login?v=3&api_key=k"
        );
    }

    #[tokio::test]
    async fn malformed_json_is_answered_when_id_is_recoverable() {
        let h = harness(Arc::new(MockBrokerGateway::new()));
        let resp = h
            .router
            .handle_raw(r#"{"request_id": "r11", "data": {}}"#)
            .await
            .unwrap();
        assert_eq!(resp.request_id, "r11");
        assert_eq!(resp.status, ResponseStatus::Error);

        assert!(h.router.handle_raw("{not json").await.is_none());
    }

    #[tokio::test]
    async fn run_answers_every_command_and_drains_on_stop() {
        let h = harness(Arc::new(FakeGateway::new()));
        let mut responses = h.bus.subscribe("blitz.responses");
        let commands = h.bus.subscribe("blitz.requests");
        let task = tokio::spawn(Arc::clone(&h.router).run(commands));

        for i in 0..20 {
            let raw = json!({
                "request_id": format!("req-{i}"),
                "action": if i % 2 == 0 { "GET_ORDERS" } else { "GET_HOLDINGS" },
                "data": {}
            });
            h.bus.send_raw("blitz.requests", raw.to_string());
        }

        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let resp: ResponseEnvelope =
                serde_json::from_str(&responses.recv().await.unwrap()).unwrap();
            assert!(resp.is_success());
            assert!(seen.insert(resp.request_id));
        }
        assert_eq!(seen.len(), 20);

        h.router.stop();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(h.router.in_flight(), 0);
    }
}
