//! Order book module
//!
//! Rebuilds full-depth books from a bootstrap snapshot and a stream of
//! incremental depth updates.

mod book;
mod engine;
mod feed;
mod registry;

pub use book::PriceLevels;
pub use engine::{
    BootstrapMode, BootstrapOutcome, DepthEngine, DropReason, FeedOutcome, SyncState,
};
pub use feed::DepthFeed;
pub use registry::{DepthRegistry, SubscriptionHandle};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

impl PriceLevel {
    pub fn new(price: Decimal, quantity: Decimal) -> Self {
        Self { price, quantity }
    }
}

/// Whether an update replaces the whole book or patches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateKind {
    Snapshot,
    Diff,
}

/// Continuity markers carried by a sequenced update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequence {
    /// First update ID in the event
    pub first: u64,
    /// Final update ID in the event
    pub last: u64,
    /// Final update ID of the previous event, when the venue links events explicitly
    pub prev: Option<u64>,
}

impl Sequence {
    /// Marker the previous applied event must have ended on
    pub fn expected_previous(&self) -> u64 {
        self.prev.unwrap_or_else(|| self.first.saturating_sub(1))
    }
}

/// Incremental (or full replacement) depth event for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthUpdate {
    pub symbol: String,
    pub kind: UpdateKind,
    /// None for venues without continuity markers
    pub sequence: Option<Sequence>,
    /// Event time (milliseconds)
    pub event_time: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Point-in-time book image used to (re)initialize an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapSnapshot {
    /// Continuity marker the image is consistent with
    pub sequence: u64,
    /// Fetch time (milliseconds)
    pub timestamp: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Materialized, immutable view of a synced book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub symbol: String,
    pub timestamp: u64,
    pub sequence: Option<u64>,
    /// Best bid first
    pub bids: Vec<PriceLevel>,
    /// Best ask first
    pub asks: Vec<PriceLevel>,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Best ask minus best bid
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_expected_previous() {
        let linked = Sequence {
            first: 101,
            last: 105,
            prev: Some(97),
        };
        assert_eq!(linked.expected_previous(), 97);

        let contiguous = Sequence {
            first: 101,
            last: 105,
            prev: None,
        };
        assert_eq!(contiguous.expected_previous(), 100);
    }

    #[test]
    fn test_snapshot_prices() {
        let snapshot = DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            timestamp: 0,
            sequence: Some(1),
            bids: vec![PriceLevel::new(dec!(99), dec!(3))],
            asks: vec![PriceLevel::new(dec!(101), dec!(1))],
        };
        assert_eq!(snapshot.mid_price(), Some(dec!(100)));
        assert_eq!(snapshot.spread(), Some(dec!(2)));
    }

    #[test]
    fn test_empty_side_has_no_mid() {
        let snapshot = DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            timestamp: 0,
            sequence: None,
            bids: vec![PriceLevel::new(dec!(99), dec!(3))],
            asks: vec![],
        };
        assert!(snapshot.mid_price().is_none());
        assert!(snapshot.spread().is_none());
    }
}
