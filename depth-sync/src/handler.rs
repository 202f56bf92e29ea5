//! Subscriber callbacks
//!
//! A `DepthHandler` receives everything produced for the symbols it was
//! registered with.

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::error::DepthSyncError;
use crate::orderbook::DepthSnapshot;
use crate::parser::Trade;

/// Application-side receiver of depth snapshots, trades and terminal errors
pub trait DepthHandler: Send + Sync {
    /// Called for every snapshot produced while the book is synced
    fn on_depth(&self, snapshot: &DepthSnapshot);

    fn on_trade(&self, _trade: &Trade) {}

    /// Called once when a subscription gives up (e.g. bootstrap retries exhausted)
    fn on_error(&self, error: &DepthSyncError);
}

/// Event forwarded by [`ChannelHandler`]
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Depth(DepthSnapshot),
    Trade(Trade),
    Error(DepthSyncError),
}

/// Forwards every callback into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<FeedEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FeedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: FeedEvent) {
        if self.tx.send(event).is_err() {
            debug!("Feed event receiver dropped");
        }
    }
}

impl DepthHandler for ChannelHandler {
    fn on_depth(&self, snapshot: &DepthSnapshot) {
        self.send(FeedEvent::Depth(snapshot.clone()));
    }

    fn on_trade(&self, trade: &Trade) {
        self.send(FeedEvent::Trade(trade.clone()));
    }

    fn on_error(&self, error: &DepthSyncError) {
        self.send(FeedEvent::Error(error.clone()));
    }
}

/// Logs top of book for each snapshot
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl DepthHandler for LoggingHandler {
    fn on_depth(&self, snapshot: &DepthSnapshot) {
        debug!(
            symbol = %snapshot.symbol,
            sequence = ?snapshot.sequence,
            best_bid = ?snapshot.best_bid().map(|l| l.price),
            best_ask = ?snapshot.best_ask().map(|l| l.price),
            bid_levels = snapshot.bids.len(),
            ask_levels = snapshot.asks.len(),
            "Depth snapshot"
        );
    }

    fn on_trade(&self, trade: &Trade) {
        tracing::trace!(
            symbol = %trade.symbol,
            price = %trade.price,
            qty = %trade.quantity,
            side = ?trade.taker_side(),
            "Trade received"
        );
    }

    fn on_error(&self, error: &DepthSyncError) {
        error!(error = %error, "Depth subscription failed");
    }
}
