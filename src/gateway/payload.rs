// Venue REST payloads and the response envelope. Numeric fields go over
// the wire as strings, matching the venue's schema.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::state::order::Side;

pub const CREATE_ORDER: &str = "/v5/order/create";
pub const AMEND_ORDER: &str = "/v5/order/amend";
pub const CANCEL_ORDER: &str = "/v5/order/cancel";
pub const CANCEL_ALL: &str = "/v5/order/cancel-all";
pub const CREATE_BATCH: &str = "/v5/order/create-batch";
pub const AMEND_BATCH: &str = "/v5/order/amend-batch";
pub const CANCEL_BATCH: &str = "/v5/order/cancel-batch";

/// Builds request bodies for one (symbol, category) pair.
#[derive(Debug, Clone)]
pub struct Payloads {
    symbol: String,
    category: String,
}

impl Payloads {
    pub fn new(symbol: &str, category: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            category: category.to_string(),
        }
    }

    pub fn create_limit(&self, link_id: &str, side: Side, price: f64, qty: f64) -> Value {
        json!({
            "category": self.category,
            "symbol": self.symbol,
            "side": side.as_str(),
            "orderType": "Limit",
            "timeInForce": "PostOnly",
            "price": price.to_string(),
            "qty": qty.to_string(),
            "orderLinkId": link_id,
        })
    }

    pub fn create_market(&self, side: Side, qty: f64) -> Value {
        json!({
            "category": self.category,
            "symbol": self.symbol,
            "side": side.as_str(),
            "orderType": "Market",
            "qty": qty.to_string(),
        })
    }

    pub fn amend(&self, link_id: &str, price: f64, qty: f64) -> Value {
        json!({
            "category": self.category,
            "symbol": self.symbol,
            "orderLinkId": link_id,
            "price": price.to_string(),
            "qty": qty.to_string(),
        })
    }

    pub fn cancel(&self, link_id: &str) -> Value {
        json!({
            "category": self.category,
            "symbol": self.symbol,
            "orderLinkId": link_id,
        })
    }

    pub fn cancel_all(&self) -> Value {
        json!({
            "category": self.category,
            "symbol": self.symbol,
        })
    }

    /// Batch envelope; callers are responsible for the 10-entry cap.
    pub fn batch(&self, entries: Vec<Value>) -> Value {
        json!({
            "category": self.category,
            "request": entries,
        })
    }
}

/// Well-formed venue response. A non-zero `ret_code` is a business-level
/// rejection and deliberately NOT a `GatewayError`: callers inspect it.
#[derive(Debug, Clone, Deserialize)]
pub struct VenueResponse {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: Value,
    #[serde(rename = "retExtInfo", default)]
    pub ret_ext_info: Value,
}

impl VenueResponse {
    pub fn is_ok(&self) -> bool {
        self.ret_code == 0
    }

    /// Exchange order id from a single-order response.
    pub fn order_id(&self) -> Option<&str> {
        self.result.get("orderId").and_then(Value::as_str)
    }

    /// Per-entry outcomes of a batch call: `result.list` carries the ids,
    /// `retExtInfo.list` the per-entry codes, index-aligned.
    pub fn batch_items(&self) -> Vec<BatchItem> {
        let ids = self
            .result
            .get("list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let codes = self
            .ret_ext_info
            .get("list")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        ids.iter()
            .enumerate()
            .map(|(i, entry)| {
                let code_entry = codes.get(i);
                BatchItem {
                    order_link_id: entry
                        .get("orderLinkId")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    exchange_order_id: entry
                        .get("orderId")
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                    code: code_entry
                        .and_then(|c| c.get("code"))
                        .and_then(Value::as_i64)
                        .unwrap_or(0),
                    msg: code_entry
                        .and_then(|c| c.get("msg"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub order_link_id: String,
    pub exchange_order_id: Option<String>,
    pub code: i64,
    pub msg: String,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}
