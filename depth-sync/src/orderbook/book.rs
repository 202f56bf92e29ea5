//! Price level storage
//!
//! Uses BTreeMap so both sides iterate in book order without a sort pass.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{PriceLevel, Side};

/// Resting quantity per price for both sides of one book
#[derive(Debug, Default, Clone)]
pub struct PriceLevels {
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
}

impl PriceLevels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a level, or remove it when the quantity is zero
    pub fn apply(&mut self, side: Side, level: &PriceLevel) {
        match side {
            Side::Bid => {
                if level.quantity.is_zero() {
                    self.bids.remove(&Reverse(level.price));
                } else {
                    self.bids.insert(Reverse(level.price), level.quantity);
                }
            }
            Side::Ask => {
                if level.quantity.is_zero() {
                    self.asks.remove(&level.price);
                } else {
                    self.asks.insert(level.price, level.quantity);
                }
            }
        }
    }

    pub fn apply_batch(&mut self, side: Side, levels: &[PriceLevel]) {
        for level in levels {
            self.apply(side, level);
        }
    }

    /// Replace both sides with a full image
    pub fn replace(&mut self, bids: &[PriceLevel], asks: &[PriceLevel]) {
        self.clear();
        self.apply_batch(Side::Bid, bids);
        self.apply_batch(Side::Ask, asks);
    }

    pub fn clear(&mut self) {
        self.bids.clear();
        self.asks.clear();
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    pub fn quantity(&self, side: Side, price: Decimal) -> Option<Decimal> {
        match side {
            Side::Bid => self.bids.get(&Reverse(price)).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }

    pub fn len(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// Copy both sides out in book order, optionally truncated to `limit` levels
    pub fn materialize(&self, limit: Option<usize>) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let limit = limit.unwrap_or(usize::MAX);
        let bids = self
            .bids
            .iter()
            .take(limit)
            .map(|(Reverse(p), q)| PriceLevel::new(*p, *q))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(limit)
            .map(|(p, q)| PriceLevel::new(*p, *q))
            .collect();
        (bids, asks)
    }
}
