//! Depth subscription registry
//!
//! Manages one `DepthFeed` per subscribed symbol and routes decoded
//! updates to it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::engine::DEFAULT_MAX_PENDING;
use super::{BootstrapMode, DepthEngine, DepthFeed, DepthSnapshot, DepthUpdate, SyncState};
use crate::config::RetryPolicy;
use crate::error::{DepthSyncError, Result};
use crate::handler::DepthHandler;
use crate::metrics::SyncMetrics;
use crate::parser::Trade;
use crate::rest::SnapshotSource;

/// Opaque token returned by [`DepthRegistry::subscribe`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    symbol: String,
}

impl SubscriptionHandle {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

struct Subscription {
    id: u64,
    feed: DepthFeed,
}

/// Manages depth feeds for multiple symbols
pub struct DepthRegistry {
    feeds: RwLock<HashMap<String, Subscription>>,
    next_id: AtomicU64,
    retry: RetryPolicy,
    max_pending: usize,
    depth_limit: Option<usize>,
    metrics: Arc<SyncMetrics>,
}

impl DepthRegistry {
    /// Create a new registry
    pub fn new(retry: RetryPolicy, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            feeds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            retry,
            max_pending: DEFAULT_MAX_PENDING,
            depth_limit: None,
            metrics,
        }
    }

    /// Limit emitted snapshots to `depth` levels per side
    pub fn with_depth_limit(mut self, depth: Option<usize>) -> Self {
        self.depth_limit = depth;
        self
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Subscribe to a symbol's depth and start synchronizing it.
    ///
    /// With a snapshot source the book is bootstrapped over REST; without one
    /// it waits for a full-replacement update on the stream.
    pub fn subscribe(
        &self,
        symbol: &str,
        source: Option<Arc<dyn SnapshotSource>>,
        handler: Arc<dyn DepthHandler>,
    ) -> Result<SubscriptionHandle> {
        let symbol = symbol.to_uppercase();
        let mode = if source.is_some() {
            BootstrapMode::Rest
        } else {
            BootstrapMode::InBand
        };

        let engine = DepthEngine::new(&symbol, mode)
            .with_max_pending(self.max_pending)
            .with_depth_limit(self.depth_limit);
        let feed = DepthFeed::new(engine, source, handler, self.retry, self.metrics.clone());

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut feeds = self.feeds.write();
            if feeds.contains_key(&symbol) {
                return Err(DepthSyncError::AlreadySubscribed(symbol));
            }
            feeds.insert(
                symbol.clone(),
                Subscription {
                    id,
                    feed: feed.clone(),
                },
            );
        }

        info!(symbol = %symbol, mode = ?mode, "Depth subscription added");
        feed.start();

        Ok(SubscriptionHandle { id, symbol })
    }

    /// Remove a subscription; stale handles are ignored
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let removed = {
            let mut feeds = self.feeds.write();
            match feeds.get(&handle.symbol) {
                Some(sub) if sub.id == handle.id => feeds.remove(&handle.symbol),
                _ => None,
            }
        };

        match removed {
            Some(sub) => {
                sub.feed.stop();
                info!(symbol = %handle.symbol, "Depth subscription removed");
                true
            }
            None => false,
        }
    }

    fn feed(&self, symbol: &str) -> Option<DepthFeed> {
        self.feeds.read().get(symbol).map(|sub| sub.feed.clone())
    }

    /// Route an update to its feed and forward any resulting snapshot
    pub fn dispatch(&self, mut update: DepthUpdate) -> Option<DepthSnapshot> {
        update.symbol = update.symbol.to_uppercase();
        let Some(feed) = self.feed(&update.symbol) else {
            debug!(symbol = %update.symbol, "Depth update for unsubscribed symbol");
            return None;
        };

        let snapshot = feed.feed(update)?;
        feed.handler().on_depth(&snapshot);
        Some(snapshot)
    }

    pub fn dispatch_trade(&self, trade: &Trade) {
        if let Some(feed) = self.feed(&trade.symbol.to_uppercase()) {
            feed.handler().on_trade(trade);
        }
    }

    /// Restart every feed, e.g. after the transport reconnected
    pub fn resync_all(&self) {
        let feeds: Vec<DepthFeed> = self.feeds.read().values().map(|s| s.feed.clone()).collect();
        info!(count = feeds.len(), "Resyncing all depth feeds");
        for feed in feeds {
            feed.start();
        }
    }

    /// Symbols whose in-band feed lost continuity and needs a resubscription
    pub fn resubscribe_requests(&self) -> Vec<String> {
        self.feeds
            .read()
            .values()
            .filter(|s| s.feed.needs_resubscribe())
            .map(|s| s.feed.symbol().to_string())
            .collect()
    }

    /// Get the synced book of a specific symbol
    pub fn snapshot(&self, symbol: &str) -> Option<DepthSnapshot> {
        self.feed(&symbol.to_uppercase())?.materialize()
    }

    pub fn state(&self, symbol: &str) -> Option<SyncState> {
        self.feed(&symbol.to_uppercase()).map(|feed| feed.state())
    }

    /// Sync state of every subscription, sorted by symbol
    pub fn states(&self) -> Vec<(String, SyncState)> {
        let mut states: Vec<(String, SyncState)> = self
            .feeds
            .read()
            .iter()
            .map(|(symbol, sub)| (symbol.clone(), sub.feed.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Check if a book is synced
    pub fn is_synced(&self, symbol: &str) -> bool {
        self.state(symbol) == Some(SyncState::Synced)
    }

    /// Get list of symbols being tracked
    pub fn symbols(&self) -> Vec<String> {
        self.feeds.read().keys().cloned().collect()
    }

    /// Check if a symbol exists
    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.feeds.read().contains_key(&symbol.to_uppercase())
    }
}
