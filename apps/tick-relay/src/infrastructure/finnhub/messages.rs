//! Finnhub WebSocket Message Types
//!
//! Wire format types for the Finnhub trade stream.
//!
//! # Outbound
//! - `SubscribeRequest`: one per tracked symbol after every handshake
//!
//! # Inbound
//! - `trade`: batch of trade prints
//! - `ping`: application-level keepalive, no reply expected
//! - `error`: server-side error report
//!
//! # References
//!
//! - [Finnhub Trades WebSocket](https://finnhub.io/docs/api/websocket-trades)

use serde::{Deserialize, Serialize};

/// Subscribe request for one symbol.
///
/// # Wire Format (JSON)
/// ```json
/// {"type": "subscribe", "symbol": "BINANCE:ETHUSDT"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    /// Message type (always "subscribe").
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    /// Symbol to subscribe to.
    pub symbol: String,
}

impl SubscribeRequest {
    /// Create a subscribe request.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            msg_type: "subscribe",
            symbol: symbol.into(),
        }
    }
}

/// Envelope shared by every inbound message.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    /// Message type discriminator.
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    /// Payload for `trade` messages; kept raw so entries are validated one by one.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    /// Error text for `error` messages.
    #[serde(default)]
    pub msg: Option<String>,
}

/// One trade print inside a `trade` message.
///
/// # Wire Format (JSON)
/// ```json
/// {"s": "BINANCE:ETHUSDT", "p": 2012.5, "t": 1700000000000, "v": 0.25, "c": null}
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TradeEntry {
    /// Symbol.
    #[serde(rename = "s", alias = "symbol")]
    pub symbol: String,
    /// Last price.
    #[serde(rename = "p", alias = "price")]
    pub price: f64,
    /// Trade time in milliseconds since the Unix epoch.
    #[serde(rename = "t", alias = "timestampMillis")]
    pub timestamp_millis: i64,
    /// Volume (unused).
    #[serde(rename = "v", default)]
    pub volume: Option<f64>,
    /// Trade conditions (unused).
    #[serde(rename = "c", default)]
    pub conditions: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_wire_format() {
        let json = serde_json::to_string(&SubscribeRequest::new("BINANCE:ETHBTC")).unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"BINANCE:ETHBTC"}"#);
    }

    #[test]
    fn trade_entry_short_names() {
        let entry: TradeEntry =
            serde_json::from_str(r#"{"s":"SYM","p":2000,"t":1700000000000,"v":1.5}"#).unwrap();
        assert_eq!(entry.symbol, "SYM");
        assert!((entry.price - 2000.0).abs() < f64::EPSILON);
        assert_eq!(entry.timestamp_millis, 1_700_000_000_000);
        assert_eq!(entry.volume, Some(1.5));
    }

    #[test]
    fn trade_entry_long_names() {
        let entry: TradeEntry =
            serde_json::from_str(r#"{"symbol":"SYM","price":12.5,"timestampMillis":5}"#).unwrap();
        assert_eq!(entry.symbol, "SYM");
        assert_eq!(entry.timestamp_millis, 5);
        assert!(entry.conditions.is_none());
    }
}
