//! Parser module for exchange depth and trade messages
//!
//! Handles deserialization of Binance-style depth diffs, trades and REST
//! snapshots, plus OKEx-style `partial`/`update` book tables, and converts
//! them into venue-neutral `DepthUpdate`s.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use crate::orderbook::{BootstrapSnapshot, DepthUpdate, PriceLevel, Sequence, UpdateKind};

/// Binance depth update message
#[derive(Debug, Clone, Deserialize)]
pub struct DepthEvent {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time (milliseconds)
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// First update ID in event
    #[serde(rename = "U")]
    pub first_update_id: u64,

    /// Final update ID in event
    #[serde(rename = "u")]
    pub final_update_id: u64,

    /// Final update ID of the previous event (futures streams only)
    #[serde(rename = "pu", default)]
    pub prev_final_update_id: Option<u64>,

    /// Bids to update
    #[serde(rename = "b", deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks to update
    #[serde(rename = "a", deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

impl DepthEvent {
    pub fn into_update(self) -> DepthUpdate {
        DepthUpdate {
            symbol: self.symbol.to_uppercase(),
            kind: UpdateKind::Diff,
            sequence: Some(Sequence {
                first: self.first_update_id,
                last: self.final_update_id,
                prev: self.prev_final_update_id,
            }),
            event_time: self.event_time,
            bids: self.bids,
            asks: self.asks,
        }
    }
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TakerSide {
    Buy,
    Sell,
}

/// Binance `trade` / `aggTrade` message
#[derive(Debug, Clone, Deserialize)]
pub struct Trade {
    /// Event type
    #[serde(rename = "e")]
    pub event_type: String,

    /// Event time
    #[serde(rename = "E")]
    pub event_time: u64,

    /// Symbol
    #[serde(rename = "s")]
    pub symbol: String,

    /// Trade ID (raw trade stream only)
    #[serde(rename = "t", default)]
    pub trade_id: Option<u64>,

    /// Price
    #[serde(rename = "p", deserialize_with = "deserialize_decimal")]
    pub price: Decimal,

    /// Quantity
    #[serde(rename = "q", deserialize_with = "deserialize_decimal")]
    pub quantity: Decimal,

    /// Trade time
    #[serde(rename = "T")]
    pub trade_time: u64,

    /// Is buyer maker
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

impl Trade {
    pub fn taker_side(&self) -> TakerSide {
        if self.is_buyer_maker {
            TakerSide::Sell
        } else {
            TakerSide::Buy
        }
    }
}

/// Order book snapshot from REST API
#[derive(Debug, Clone, Deserialize)]
pub struct RestDepthSnapshot {
    /// Last update ID
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,

    /// Bids
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    /// Asks
    #[serde(deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,
}

impl RestDepthSnapshot {
    pub fn into_bootstrap(self, timestamp: u64) -> BootstrapSnapshot {
        BootstrapSnapshot {
            sequence: self.last_update_id,
            timestamp,
            bids: self.bids,
            asks: self.asks,
        }
    }
}

/// Combined stream message wrapper
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Stream name
    pub stream: String,

    /// Data payload
    pub data: serde_json::Value,
}

/// OKEx-style book table: `partial` replaces the book, `update` patches it
#[derive(Debug, Clone, Deserialize)]
pub struct BookTable {
    pub table: String,
    pub action: String,
    pub data: Vec<BookTableEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookTableEntry {
    pub instrument_id: String,

    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub bids: Vec<PriceLevel>,

    #[serde(default, deserialize_with = "deserialize_price_levels")]
    pub asks: Vec<PriceLevel>,

    /// RFC 3339 timestamp
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BookTable {
    pub fn into_updates(self) -> Vec<DepthUpdate> {
        let kind = if self.action == "partial" {
            UpdateKind::Snapshot
        } else {
            UpdateKind::Diff
        };

        self.data
            .into_iter()
            .map(|entry| DepthUpdate {
                symbol: entry.instrument_id.to_uppercase(),
                kind,
                sequence: None,
                event_time: entry
                    .timestamp
                    .as_deref()
                    .and_then(parse_rfc3339_millis)
                    .unwrap_or(0),
                bids: entry.bids,
                asks: entry.asks,
            })
            .collect()
    }
}

/// Parsed WebSocket message
#[derive(Debug, Clone)]
pub enum ParsedMessage {
    Depth(Vec<DepthUpdate>),
    Trade(Trade),
    Unknown(String),
}

impl ParsedMessage {
    /// Parse a raw WebSocket message
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(raw)?;

        // Combined streams wrap the event in {"stream": .., "data": ..}
        if value.get("stream").is_some() && value.get("data").is_some() {
            let stream_msg: StreamMessage = serde_json::from_value(value)?;
            return Self::parse_stream_data(&stream_msg.stream, stream_msg.data);
        }

        if value.get("table").is_some() && value.get("action").is_some() {
            let table: BookTable = serde_json::from_value(value)?;
            if table.table.contains("depth") {
                return Ok(ParsedMessage::Depth(table.into_updates()));
            }
            return Ok(ParsedMessage::Unknown(raw.to_string()));
        }

        Self::parse_event(value)
    }

    fn parse_stream_data(stream: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        if stream.contains("depth") {
            let depth: DepthEvent = serde_json::from_value(data)?;
            Ok(ParsedMessage::Depth(vec![depth.into_update()]))
        } else if stream.contains("trade") || stream.contains("Trade") {
            let trade: Trade = serde_json::from_value(data)?;
            Ok(ParsedMessage::Trade(trade))
        } else {
            Ok(ParsedMessage::Unknown(data.to_string()))
        }
    }

    fn parse_event(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        match value.get("e").and_then(|e| e.as_str()) {
            Some("depthUpdate") => {
                let depth: DepthEvent = serde_json::from_value(value)?;
                Ok(ParsedMessage::Depth(vec![depth.into_update()]))
            }
            Some("trade") | Some("aggTrade") => {
                let trade: Trade = serde_json::from_value(value)?;
                Ok(ParsedMessage::Trade(trade))
            }
            _ => Ok(ParsedMessage::Unknown(value.to_string())),
        }
    }
}

fn parse_rfc3339_millis(ts: &str) -> Option<u64> {
    chrono::DateTime::parse_from_rfc3339(ts)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp_millis()).ok())
}

/// Custom deserializer for Decimal from string
fn deserialize_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Decimal::from_str(&s).map_err(serde::de::Error::custom)
}

/// Custom deserializer for price levels from arrays of strings.
/// Columns past price and quantity (order counts etc.) are ignored.
fn deserialize_price_levels<'de, D>(deserializer: D) -> Result<Vec<PriceLevel>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<serde_json::Value>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|row| {
            if row.len() < 2 {
                return Err(serde::de::Error::custom("Invalid price level format"));
            }
            Ok(PriceLevel {
                price: decimal_from_value(&row[0]).map_err(serde::de::Error::custom)?,
                quantity: decimal_from_value(&row[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}

fn decimal_from_value(value: &serde_json::Value) -> Result<Decimal, String> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).map_err(|e| e.to_string()),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).map_err(|e| e.to_string()),
        other => Err(format!("Expected decimal, got {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_depth_update() {
        let raw = r#"{
            "e": "depthUpdate",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "U": 100,
            "u": 105,
            "b": [["50000.00", "1.5"], ["49999.00", "2.0"]],
            "a": [["50001.00", "1.0"], ["50002.00", "0.5"]]
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Depth(updates) = msg {
            let depth = &updates[0];
            assert_eq!(depth.symbol, "BTCUSDT");
            assert_eq!(depth.kind, UpdateKind::Diff);
            assert_eq!(depth.bids.len(), 2);
            assert_eq!(depth.asks.len(), 2);
            assert_eq!(depth.bids[0].price, dec!(50000.00));
            assert_eq!(
                depth.sequence,
                Some(Sequence {
                    first: 100,
                    last: 105,
                    prev: None
                })
            );
        } else {
            panic!("Expected Depth");
        }
    }

    #[test]
    fn test_parse_futures_depth_in_combined_stream() {
        let raw = r#"{
            "stream": "btcusdt@depth",
            "data": {
                "e": "depthUpdate",
                "E": 1672531200000,
                "T": 1672531199990,
                "s": "BTCUSDT",
                "U": 200,
                "u": 210,
                "pu": 199,
                "b": [["50000.00", "0"]],
                "a": []
            }
        }"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Depth(updates) => {
                let seq = updates[0].sequence.unwrap();
                assert_eq!(seq.prev, Some(199));
                assert_eq!(seq.expected_previous(), 199);
                assert!(updates[0].bids[0].quantity.is_zero());
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_trade() {
        let raw = r#"{
            "e": "trade",
            "E": 1672531200000,
            "s": "BTCUSDT",
            "t": 12345,
            "p": "50000.50",
            "q": "0.5",
            "b": 111,
            "a": 222,
            "T": 1672531200000,
            "m": false
        }"#;

        let msg = ParsedMessage::parse(raw).unwrap();
        if let ParsedMessage::Trade(trade) = msg {
            assert_eq!(trade.symbol, "BTCUSDT");
            assert_eq!(trade.price, dec!(50000.50));
            assert_eq!(trade.trade_id, Some(12345));
            assert_eq!(trade.taker_side(), TakerSide::Buy);
        } else {
            panic!("Expected Trade");
        }
    }

    #[test]
    fn test_parse_agg_trade_stream() {
        let raw = r#"{
            "stream": "btcusdt@aggTrade",
            "data": {
                "e": "aggTrade",
                "E": 1672531200000,
                "s": "BTCUSDT",
                "a": 5933014,
                "p": "0.001",
                "q": "100",
                "f": 100,
                "l": 105,
                "T": 1672531200000,
                "m": true
            }
        }"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Trade(trade) => {
                assert_eq!(trade.trade_id, None);
                assert_eq!(trade.taker_side(), TakerSide::Sell);
            }
            other => panic!("Expected Trade, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_book_table_partial() {
        let raw = r#"{
            "table": "spot/depth",
            "action": "partial",
            "data": [{
                "instrument_id": "btc-usdt",
                "asks": [["8.8", "96.99999966", "1"], ["9", "39", "3"]],
                "bids": [["8.7", "10", "2"]],
                "timestamp": "2019-05-06T07:19:39.348Z",
                "checksum": -2144245928
            }]
        }"#;

        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Depth(updates) => {
                assert_eq!(updates.len(), 1);
                let update = &updates[0];
                assert_eq!(update.symbol, "BTC-USDT");
                assert_eq!(update.kind, UpdateKind::Snapshot);
                assert!(update.sequence.is_none());
                assert_eq!(update.asks[0], PriceLevel::new(dec!(8.8), dec!(96.99999966)));
                assert_eq!(update.event_time, 1557127179348);
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_book_table_update() {
        let raw = r#"{"table":"spot/depth","action":"update","data":[{"instrument_id":"ETH-USDT","bids":[["180.1","0","0"]]}]}"#;
        match ParsedMessage::parse(raw).unwrap() {
            ParsedMessage::Depth(updates) => {
                assert_eq!(updates[0].kind, UpdateKind::Diff);
                assert!(updates[0].asks.is_empty());
                assert_eq!(updates[0].event_time, 0);
            }
            other => panic!("Expected Depth, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rest_snapshot() {
        let raw = r#"{
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"]],
            "asks": [["4.00000200", "12.00000000"]]
        }"#;
        let snapshot: RestDepthSnapshot = serde_json::from_str(raw).unwrap();
        let bootstrap = snapshot.into_bootstrap(42);
        assert_eq!(bootstrap.sequence, 1027024);
        assert_eq!(bootstrap.timestamp, 42);
        assert_eq!(bootstrap.bids[0].price, dec!(4));
    }

    #[test]
    fn test_malformed_level_rejected() {
        let raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":1,"u":2,"b":[["1.0"]],"a":[]}"#;
        assert!(ParsedMessage::parse(raw).is_err());

        let raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":1,"u":2,"b":[["abc","1"]],"a":[]}"#;
        assert!(ParsedMessage::parse(raw).is_err());
    }

    #[test]
    fn test_unknown_event() {
        let raw = r#"{"result": null, "id": 1}"#;
        assert!(matches!(
            ParsedMessage::parse(raw).unwrap(),
            ParsedMessage::Unknown(_)
        ));
        assert!(ParsedMessage::parse("not json").is_err());
    }
}
