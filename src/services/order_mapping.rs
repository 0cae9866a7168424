//! Command payload → brokerage parameter mapping
//!
//! Pure functions over the `data` object of an inbound command. Nothing here
//! touches the network, so every rule is covered by plain unit tests.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::domain::{ModifyParams, OrderParams, OrderSide, Validity};
use crate::error::{BridgeError, Result};

pub const DEFAULT_EXCHANGE: &str = "NSE";
pub const DEFAULT_PRODUCT: &str = "MIS";
pub const DEFAULT_ORDER_TYPE: &str = "MARKET";
pub const DEFAULT_MODIFY_ORDER_TYPE: &str = "LIMIT";

const SYMBOL_SEPARATOR: char = '|';

/// Split `EXCHANGE|SYMBOL`; a bare symbol trades on the default exchange.
pub fn split_symbol(raw: &str) -> (String, String) {
    match raw.split_once(SYMBOL_SEPARATOR) {
        Some((exchange, symbol)) => (exchange.trim().to_string(), symbol.trim().to_string()),
        None => (DEFAULT_EXCHANGE.to_string(), raw.trim().to_string()),
    }
}

fn field<'a>(data: &'a Value, key: &str) -> Option<&'a Value> {
    data.get(key).filter(|v| !v.is_null())
}

fn string_field(data: &Value, key: &str) -> Result<Option<String>> {
    match field(data, key) {
        None => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(BridgeError::Validation(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

fn required_string(data: &Value, key: &str) -> Result<String> {
    string_field(data, key)?
        .ok_or_else(|| BridgeError::Validation(format!("missing required field '{key}'")))
}

/// Integer quantity; accepts JSON numbers and numeric strings.
fn quantity_field(data: &Value, key: &str) -> Result<Option<u32>> {
    let invalid = || BridgeError::Validation(format!("'{key}' must be a non-negative integer"));
    match field(data, key) {
        None => Ok(None),
        Some(Value::Number(n)) => {
            let qty = n.as_u64().ok_or_else(invalid)?;
            u32::try_from(qty).map(Some).map_err(|_| invalid())
        }
        Some(Value::String(s)) => s.trim().parse::<u32>().map(Some).map_err(|_| invalid()),
        Some(_) => Err(invalid()),
    }
}

fn decimal_field(data: &Value, key: &str) -> Result<Option<Decimal>> {
    let raw = match field(data, key) {
        None => return Ok(None),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => {
            return Err(BridgeError::Validation(format!(
                "'{key}' must be numeric, got {other}"
            )))
        }
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map(Some)
        .map_err(|_| BridgeError::Validation(format!("'{key}' is not a valid number: {raw}")))
}

fn side_field(data: &Value) -> Result<OrderSide> {
    let raw = match string_field(data, "orderSide")? {
        Some(side) => Some(side),
        None => string_field(data, "side")?,
    };
    match raw {
        Some(side) => OrderSide::from_str(&side).map_err(BridgeError::Validation),
        None => Ok(OrderSide::Buy),
    }
}

/// Map a `PLACE_ORDER` payload to brokerage order parameters.
///
/// `symbol` and a positive `quantity` are required; everything else has a default.
pub fn map_place_order(data: &Value) -> Result<OrderParams> {
    let raw_symbol = required_string(data, "symbol")?;
    let (exchange, tradingsymbol) = split_symbol(&raw_symbol);
    if exchange.is_empty() || tradingsymbol.is_empty() {
        return Err(BridgeError::Validation(format!(
            "symbol '{raw_symbol}' must look like EXCHANGE|SYMBOL"
        )));
    }

    let quantity = quantity_field(data, "quantity")?
        .ok_or_else(|| BridgeError::Validation("missing required field 'quantity'".into()))?;
    if quantity == 0 {
        return Err(BridgeError::Validation("'quantity' must be positive".into()));
    }

    let tif = string_field(data, "tif")?;

    Ok(OrderParams {
        tradingsymbol,
        exchange,
        transaction_type: side_field(data)?,
        order_type: string_field(data, "orderType")?
            .map(|t| t.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_ORDER_TYPE.to_string()),
        quantity,
        product: string_field(data, "product")?
            .map(|p| p.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_PRODUCT.to_string()),
        price: decimal_field(data, "price")?.unwrap_or_default(),
        trigger_price: decimal_field(data, "stopPrice")?.unwrap_or_default(),
        validity: Validity::from_tif(tif.as_deref()),
    })
}

/// Map a `MODIFY_ORDER` payload. Only `order_id` is required.
pub fn map_modify_order(data: &Value) -> Result<ModifyParams> {
    let validity = match string_field(data, "validity")? {
        Some(v) => Some(v),
        None => string_field(data, "tif")?,
    };

    Ok(ModifyParams {
        order_id: required_string(data, "order_id")?,
        order_type: string_field(data, "orderType")?
            .map(|t| t.to_ascii_uppercase())
            .unwrap_or_else(|| DEFAULT_MODIFY_ORDER_TYPE.to_string()),
        quantity: quantity_field(data, "quantity")?.unwrap_or(0),
        validity: validity.unwrap_or_else(|| Validity::Day.as_str().to_string()),
    })
}

pub fn map_cancel_order(data: &Value) -> Result<String> {
    required_string(data, "order_id")
}

pub fn map_login(data: &Value) -> Result<String> {
    required_string(data, "request_token")
}

/// Order id from a placement response, when the brokerage returned one.
pub fn extract_order_id(response: &Value) -> Option<String> {
    match field(response, "order_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
