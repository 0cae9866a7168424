use super::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::BridgeError;

/// Scripted in-memory gateway for service unit tests.
///
/// The order book is whatever the test last set; `list_orders` fails while
/// `fail_listing` is on.
pub struct FakeGateway {
    authenticated: AtomicBool,
    orders: Mutex<Vec<OrderRecord>>,
    fail_listing: AtomicBool,
    list_calls: AtomicUsize,
    next_order_id: AtomicUsize,
    placed: Mutex<Vec<OrderParams>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            orders: Mutex::new(Vec::new()),
            fail_listing: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            next_order_id: AtomicUsize::new(1),
            placed: Mutex::new(Vec::new()),
        }
    }

    pub fn logged_out() -> Self {
        let gw = Self::new();
        gw.authenticated.store(false, Ordering::SeqCst);
        gw
    }

    pub fn set_orders(&self, orders: &[(&str, &str)]) {
        *self.orders.lock().unwrap() = orders
            .iter()
            .map(|(id, status)| OrderRecord::new(id, status))
            .collect();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn placed(&self) -> Vec<OrderParams> {
        self.placed.lock().unwrap().clone()
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerGateway for FakeGateway {
    fn login_url(&self) -> String {
        "https://kite.zerodha.com/connect/login?v=3&api_key=test".to_string()
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn login(&self, _request_token: &str) -> Result<Session> {
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(Session {
            user_id: Some("AB1234".to_string()),
            access_token: AccessToken::new("fake-access-token"),
        })
    }

    async fn logout(&self) -> Result<()> {
        self.authenticated.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn place_order(&self, params: &OrderParams) -> Result<Value> {
        self.placed.lock().unwrap().push(params.clone());
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "order_id": format!("ORD{id}") }))
    }

    async fn modify_order(&self, params: &ModifyParams) -> Result<Value> {
        Ok(serde_json::json!({ "order_id": params.order_id }))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<Value> {
        Ok(serde_json::json!({ "order_id": order_id }))
    }

    async fn list_orders(&self) -> Result<Vec<OrderRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(BridgeError::gateway("order book unavailable"));
        }
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn get_holdings(&self) -> Result<Value> {
        Ok(serde_json::json!([]))
    }

    async fn get_positions(&self) -> Result<Value> {
        Ok(serde_json::json!({ "net": [], "day": [] }))
    }
}
