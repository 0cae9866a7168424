use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::BridgeError;

/// Commands accepted on the inbound request topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetLoginUrl,
    Login,
    Logout,
    PlaceOrder,
    ModifyOrder,
    CancelOrder,
    GetOrders,
    GetHoldings,
    GetPositions,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::GetLoginUrl,
        Action::Login,
        Action::Logout,
        Action::PlaceOrder,
        Action::ModifyOrder,
        Action::CancelOrder,
        Action::GetOrders,
        Action::GetHoldings,
        Action::GetPositions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::GetLoginUrl => "GET_LOGIN_URL",
            Action::Login => "LOGIN",
            Action::Logout => "LOGOUT",
            Action::PlaceOrder => "PLACE_ORDER",
            Action::ModifyOrder => "MODIFY_ORDER",
            Action::CancelOrder => "CANCEL_ORDER",
            Action::GetOrders => "GET_ORDERS",
            Action::GetHoldings => "GET_HOLDINGS",
            Action::GetPositions => "GET_POSITIONS",
        }
    }

    /// Whether the action needs a brokerage session.
    pub fn requires_session(&self) -> bool {
        !matches!(self, Action::GetLoginUrl | Action::Login | Action::Logout)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = BridgeError;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == raw)
            .ok_or_else(|| BridgeError::UnknownCommand(raw.to_string()))
    }
}

/// Inbound request: `{request_id, action, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub request_id: String,
    pub action: String,
    #[serde(default, alias = "payload")]
    pub data: Value,
}

impl CommandEnvelope {
    pub fn new(request_id: &str, action: &str, data: Value) -> Self {
        Self {
            request_id: request_id.to_string(),
            action: action.to_string(),
            data,
        }
    }

    /// Decode a raw bus message.
    ///
    /// On failure, returns the request id when it can still be recovered so the
    /// caller can answer with a correlated error.
    pub fn parse(raw: &str) -> std::result::Result<Self, (Option<String>, BridgeError)> {
        match serde_json::from_str::<CommandEnvelope>(raw) {
            Ok(envelope) => Ok(envelope),
            Err(e) => {
                let request_id = serde_json::from_str::<Value>(raw).ok().and_then(|v| {
                    v.get("request_id")
                        .and_then(|id| id.as_str().map(str::to_string))
                });
                Err((
                    request_id,
                    BridgeError::Validation(format!("malformed command envelope: {e}")),
                ))
            }
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data.get(key).filter(|v| !v.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Outbound reply, correlated to its command by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: String,
    pub status: ResponseStatus,
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    pub fn success(request_id: &str, data: Value) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: ResponseStatus::Success,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(request_id: &str, error: &BridgeError) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: ResponseStatus::Error,
            data: None,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}
