//! Stream Codec Module
//!
//! Decodes Finnhub text frames into domain ticks and encodes subscribe
//! requests. Trade batches are validated entry by entry: one malformed
//! print is dropped without discarding its siblings.

use chrono::DateTime;

use crate::domain::streaming::Tick;
use crate::infrastructure::finnhub::messages::{Envelope, SubscribeRequest, TradeEntry};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not a message object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Trade batch with at least one valid tick.
    Trades(Vec<Tick>),
    /// Application-level ping.
    Ping,
    /// Server error report.
    Error(String),
    /// Any other shape, including trade frames with no usable entries.
    Other,
}

/// JSON codec for the Finnhub stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object.
    pub fn decode(&self, text: &str) -> Result<InboundFrame, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let envelope: Envelope = serde_json::from_str(trimmed)?;

        let frame = match envelope.msg_type.as_deref() {
            Some("trade") => Self::decode_trades(envelope.data),
            Some("ping") => InboundFrame::Ping,
            Some("error") => InboundFrame::Error(envelope.msg.unwrap_or_default()),
            _ => InboundFrame::Other,
        };
        Ok(frame)
    }

    fn decode_trades(data: Option<serde_json::Value>) -> InboundFrame {
        let Some(serde_json::Value::Array(entries)) = data else {
            return InboundFrame::Other;
        };

        let ticks: Vec<Tick> = entries
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<TradeEntry>(value) {
                Ok(entry) => Self::entry_to_tick(entry),
                Err(e) => {
                    tracing::debug!(error = %e, "Dropping malformed trade entry");
                    None
                }
            })
            .collect();

        if ticks.is_empty() {
            InboundFrame::Other
        } else {
            InboundFrame::Trades(ticks)
        }
    }

    fn entry_to_tick(entry: TradeEntry) -> Option<Tick> {
        if !entry.price.is_finite() {
            tracing::debug!(symbol = %entry.symbol, "Dropping trade entry with non-finite price");
            return None;
        }
        let Some(timestamp) = DateTime::from_timestamp_millis(entry.timestamp_millis) else {
            tracing::debug!(
                symbol = %entry.symbol,
                timestamp_millis = entry.timestamp_millis,
                "Dropping trade entry with out-of-range timestamp"
            );
            return None;
        };
        Some(Tick::new(entry.symbol, entry.price, timestamp))
    }

    /// Encode a subscribe request for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(&self, symbol: &str) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&SubscribeRequest::new(symbol))?)
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn decode_trade_frame() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"type":"trade","data":[{"s":"SYM","p":2000,"t":1700000000000,"v":0.1}]}"#)
            .unwrap();

        let InboundFrame::Trades(ticks) = frame else {
            panic!("expected trades, got {frame:?}");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "SYM");
        assert!((ticks[0].price - 2000.0).abs() < f64::EPSILON);
        assert_eq!(ticks[0].timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn decode_trade_frame_with_long_names() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(r#"{"type":"trade","data":[{"symbol":"SYM","price":2000,"timestampMillis":1}]}"#)
            .unwrap();
        assert!(matches!(frame, InboundFrame::Trades(ref t) if t[0].symbol == "SYM"));
    }

    #[test]
    fn malformed_entries_are_dropped_individually() {
        let codec = JsonCodec::new();
        let frame = codec
            .decode(
                r#"{"type":"trade","data":[{"s":"BAD","p":"x","t":1},{"s":"OK","p":1.5,"t":2},{"p":3,"t":3}]}"#,
            )
            .unwrap();

        let InboundFrame::Trades(ticks) = frame else {
            panic!("expected trades");
        };
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].symbol, "OK");
    }

    #[test_case(r#"{"type":"trade","data":[]}"# ; "empty data")]
    #[test_case(r#"{"type":"trade"}"# ; "missing data")]
    #[test_case(r#"{"type":"trade","data":{"s":"SYM"}}"# ; "data not an array")]
    #[test_case(r#"{"type":"trade","data":[{"s":"SYM"}]}"# ; "only malformed entries")]
    #[test_case(r#"{"type":"news","data":[]}"# ; "unknown type")]
    #[test_case(r#"{"data":[]}"# ; "no type")]
    fn non_trade_shapes_are_other(text: &str) {
        assert_eq!(JsonCodec::new().decode(text).unwrap(), InboundFrame::Other);
    }

    #[test]
    fn decode_ping_and_error() {
        let codec = JsonCodec::new();
        assert_eq!(codec.decode(r#"{"type":"ping"}"#).unwrap(), InboundFrame::Ping);
        assert_eq!(
            codec
                .decode(r#"{"type":"error","msg":"Subscribing to too many symbols"}"#)
                .unwrap(),
            InboundFrame::Error("Subscribing to too many symbols".to_string())
        );
    }

    #[test_case("not json" ; "plain text")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case("{\"type\":" ; "truncated")]
    fn invalid_frames_error(text: &str) {
        assert!(JsonCodec::new().decode(text).is_err());
    }

    #[test]
    fn encode_subscribe() {
        let json = JsonCodec::new().encode_subscribe("SYM").unwrap();
        assert_eq!(json, r#"{"type":"subscribe","symbol":"SYM"}"#);
    }
}
