// Wire shapes for the venue's v5 websocket channels. Prices and sizes
// arrive as strings; parsing failures skip the level rather than poison
// the whole message.

use serde::Deserialize;

/// Every inbound frame: either an op acknowledgment (`success`) or a topic
/// push carrying `data`. Unknown shapes deserialize with everything `None`
/// and are ignored, which keeps the feed forward-compatible.
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    pub topic: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub success: Option<bool>,
    pub op: Option<String>,
    pub ts: Option<u64>,
    pub data: Option<serde_json::Value>,
}

/// `orderbook.<depth>.<symbol>` payload.
#[derive(Debug, Deserialize)]
pub struct BookData {
    /// symbol
    pub s: String,
    /// bid levels, `[price, size]` strings
    #[serde(default)]
    pub b: Vec<[String; 2]>,
    /// ask levels
    #[serde(default)]
    pub a: Vec<[String; 2]>,
}

/// `execution` topic entry.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionData {
    pub symbol: String,
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    pub exec_type: String,
    pub side: String,
    #[serde(default)]
    pub exec_price: String,
    #[serde(default)]
    pub exec_qty: String,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// `order` topic entry; used to merge venue-side terminal transitions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub symbol: String,
    pub order_id: String,
    #[serde(default)]
    pub order_link_id: String,
    pub order_status: String,
}

/// `position` topic entry; authoritative resync of the net position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionData {
    pub symbol: String,
    pub side: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub avg_price: String,
}

pub fn parse_num(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_levels(levels: &[[String; 2]]) -> Vec<(f64, f64)> {
    levels
        .iter()
        .filter_map(|[px, sz]| Some((parse_num(px)?, parse_num(sz)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_frame_roundtrip() {
        let raw = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000000000,
            "data": {"s": "BTCUSDT", "b": [["100.5", "2"]], "a": [["100.6", "1"]]}
        }"#;
        let env: WsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.topic.as_deref(), Some("orderbook.50.BTCUSDT"));
        let data: BookData = serde_json::from_value(env.data.unwrap()).unwrap();
        assert_eq!(data.s, "BTCUSDT");
        assert_eq!(parse_levels(&data.b), vec![(100.5, 2.0)]);
    }

    #[test]
    fn test_op_ack_is_recognised() {
        let raw = r#"{"success": true, "op": "subscribe"}"#;
        let env: WsEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.success, Some(true));
        assert!(env.topic.is_none());
    }

    #[test]
    fn test_execution_entry() {
        let raw = r#"{
            "symbol": "BTCUSDT", "orderId": "oid-1", "orderLinkId": "mmx-1",
            "execType": "Trade", "side": "Buy",
            "execPrice": "100.0", "execQty": "0.5"
        }"#;
        let exec: ExecutionData = serde_json::from_str(raw).unwrap();
        assert_eq!(exec.exec_type, "Trade");
        assert_eq!(parse_num(&exec.exec_qty), Some(0.5));
        assert!(exec.reject_reason.is_none());
    }

    #[test]
    fn test_bad_level_is_skipped() {
        let levels = vec![
            ["abc".to_string(), "1".to_string()],
            ["100.0".to_string(), "2".to_string()],
        ];
        assert_eq!(parse_levels(&levels), vec![(100.0, 2.0)]);
    }
}
