pub mod kite;
#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::domain::{ModifyParams, OrderParams, OrderRecord};
use crate::error::Result;

pub use kite::KiteClient;

/// Session token handed out by a successful login.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: Option<String>,
    pub access_token: AccessToken,
}

/// Brokerage API as seen by the router and the monitor.
///
/// Every call is bounded by the implementation's request timeout and fails
/// with [`crate::BridgeError::Gateway`] on transport or API errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Browser URL where the user obtains a request token.
    fn login_url(&self) -> String;

    fn is_authenticated(&self) -> bool;

    async fn login(&self, request_token: &str) -> Result<Session>;

    async fn logout(&self) -> Result<()>;

    async fn place_order(&self, params: &OrderParams) -> Result<Value>;

    async fn modify_order(&self, params: &ModifyParams) -> Result<Value>;

    async fn cancel_order(&self, order_id: &str) -> Result<Value>;

    async fn list_orders(&self) -> Result<Vec<OrderRecord>>;

    async fn get_holdings(&self) -> Result<Value>;

    async fn get_positions(&self) -> Result<Value>;
}
