use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(OrderSide::Buy),
            "SELL" | "S" => Ok(OrderSide::Sell),
            other => Err(format!("invalid order side '{other}'; expected BUY|SELL")),
        }
    }
}

/// Order validity sent to the brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Day,
    Ioc,
}

impl Validity {
    /// Normalize an inbound time-in-force token.
    ///
    /// Only `IOC` is honoured; anything else (including `GTD`) falls back to DAY.
    pub fn from_tif(tif: Option<&str>) -> Self {
        match tif {
            Some(t) if t.trim().eq_ignore_ascii_case("IOC") => Validity::Ioc,
            _ => Validity::Day,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Validity::Day => "DAY",
            Validity::Ioc => "IOC",
        }
    }
}

/// Order status as reported by the brokerage.
///
/// Open set: statuses the bridge does not know about are carried through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OrderStatus {
    Initialized,
    Open,
    Complete,
    Cancelled,
    Rejected,
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            OrderStatus::Initialized => "INITIALIZED",
            OrderStatus::Open => "OPEN",
            OrderStatus::Complete => "COMPLETE",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Other(s) => s,
        }
    }

    /// Statuses after which the monitor stops tracking an order.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Complete | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

impl From<&str> for OrderStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "INITIALIZED" => OrderStatus::Initialized,
            "OPEN" => OrderStatus::Open,
            "COMPLETE" => OrderStatus::Complete,
            "CANCELLED" => OrderStatus::Cancelled,
            "REJECTED" => OrderStatus::Rejected,
            other => OrderStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(raw: String) -> Self {
        OrderStatus::from(raw.as_str())
    }
}

impl From<OrderStatus> for String {
    fn from(status: OrderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An order placed through this bridge that the monitor is watching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitoredOrder {
    pub order_id: String,
    pub last_status: OrderStatus,
    pub symbol: String,
    pub quantity: u32,
    pub side: OrderSide,
}

impl MonitoredOrder {
    pub fn new(order_id: &str, symbol: &str, quantity: u32, side: OrderSide) -> Self {
        Self {
            order_id: order_id.to_string(),
            last_status: OrderStatus::Initialized,
            symbol: symbol.to_string(),
            quantity,
            side,
        }
    }
}

/// One entry of the brokerage order book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderRecord {
    pub fn new(order_id: &str, status: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            status: OrderStatus::from(status),
            extra: Map::new(),
        }
    }
}

/// Lifecycle event published when a tracked order changes status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    OrderAccepted,
    OrderTraded,
    OrderCancelled,
    OrderRejected,
    OrderUpdated,
}

impl LifecycleEventKind {
    pub fn classify(old: &OrderStatus, new: &OrderStatus) -> Self {
        match (old, new) {
            (OrderStatus::Initialized, OrderStatus::Open) => LifecycleEventKind::OrderAccepted,
            (_, OrderStatus::Complete) => LifecycleEventKind::OrderTraded,
            (_, OrderStatus::Cancelled) => LifecycleEventKind::OrderCancelled,
            (_, OrderStatus::Rejected) => LifecycleEventKind::OrderRejected,
            _ => LifecycleEventKind::OrderUpdated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::OrderAccepted => "ORDER_ACCEPTED",
            LifecycleEventKind::OrderTraded => "ORDER_TRADED",
            LifecycleEventKind::OrderCancelled => "ORDER_CANCELLED",
            LifecycleEventKind::OrderRejected => "ORDER_REJECTED",
            LifecycleEventKind::OrderUpdated => "ORDER_UPDATED",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status transition observed by one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderLifecycleEvent {
    pub event: LifecycleEventKind,
    pub order_id: String,
    pub previous_status: OrderStatus,
    pub current_status: OrderStatus,
    pub details: OrderRecord,
}

/// Parameters for a new regular order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderParams {
    pub tradingsymbol: String,
    pub exchange: String,
    pub transaction_type: OrderSide,
    pub order_type: String,
    pub quantity: u32,
    pub product: String,
    pub price: Decimal,
    pub trigger_price: Decimal,
    pub validity: Validity,
}

/// Parameters for modifying an open order.
///
/// `validity` is forwarded as given so brokerage-side values such as `TTL`
/// survive a modification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifyParams {
    #[serde(skip)]
    pub order_id: String,
    pub order_type: String,
    pub quantity: u32,
    pub validity: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn st(s: &str) -> OrderStatus {
        OrderStatus::from(s)
    }

    #[test]
    fn classify_follows_transition_table() {
        use LifecycleEventKind::*;
        assert_eq!(LifecycleEventKind::classify(&st("INITIALIZED"), &st("OPEN")), OrderAccepted);
        assert_eq!(LifecycleEventKind::classify(&st("OPEN"), &st("COMPLETE")), OrderTraded);
        assert_eq!(LifecycleEventKind::classify(&st("INITIALIZED"), &st("COMPLETE")), OrderTraded);
        assert_eq!(LifecycleEventKind::classify(&st("OPEN"), &st("CANCELLED")), OrderCancelled);
        assert_eq!(LifecycleEventKind::classify(&st("INITIALIZED"), &st("REJECTED")), OrderRejected);
        assert_eq!(
            LifecycleEventKind::classify(&st("OPEN"), &st("TRIGGER PENDING")),
            OrderUpdated
        );
        // OPEN is only "accepted" when it follows INITIALIZED
        assert_eq!(
            LifecycleEventKind::classify(&st("TRIGGER PENDING"), &st("OPEN")),
            OrderUpdated
        );
    }

    #[test]
    fn unknown_statuses_pass_through() {
        let status = st("AMO REQ RECEIVED");
        assert_eq!(status, OrderStatus::Other("AMO REQ RECEIVED".to_string()));
        assert_eq!(status.to_string(), "AMO REQ RECEIVED");
        assert!(!status.is_terminal());
        assert!(st("REJECTED").is_terminal());
        assert!(!st("OPEN").is_terminal());
    }

    #[test]
    fn order_record_keeps_extra_fields() {
        let record: OrderRecord = serde_json::from_value(serde_json::json!({
            "order_id": "220101000000001",
            "status": "OPEN",
            "tradingsymbol": "INFY",
            "filled_quantity": 0
        }))
        .unwrap();
        assert_eq!(record.status, OrderStatus::Open);
        assert_eq!(record.extra["tradingsymbol"], "INFY");

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["status"], "OPEN");
        assert_eq!(back["filled_quantity"], 0);
    }

    #[test]
    fn validity_defaults_to_day() {
        assert_eq!(Validity::from_tif(None), Validity::Day);
        assert_eq!(Validity::from_tif(Some("GTD")), Validity::Day);
        assert_eq!(Validity::from_tif(Some("ioc")), Validity::Ioc);
    }
}
