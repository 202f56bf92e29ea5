//! Thread-safe wrapper around a `DepthEngine`
//!
//! The feed-handling path calls `feed` for every decoded update while
//! bootstrap snapshots are fetched on spawned tasks. Both sides share one
//! mutex; the REST round trip itself runs without holding it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::engine::{BootstrapMode, BootstrapOutcome, DepthEngine, FeedOutcome, SyncState};
use super::{BootstrapSnapshot, DepthSnapshot, DepthUpdate};
use crate::config::RetryPolicy;
use crate::error::{DepthSyncError, Result};
use crate::handler::DepthHandler;
use crate::metrics::SyncMetrics;
use crate::rest::SnapshotSource;

/// One instrument's engine, its snapshot source and its subscriber
#[derive(Clone)]
pub struct DepthFeed {
    symbol: String,
    engine: Arc<Mutex<DepthEngine>>,
    source: Option<Arc<dyn SnapshotSource>>,
    handler: Arc<dyn DepthHandler>,
    retry: RetryPolicy,
    metrics: Arc<SyncMetrics>,
}

impl DepthFeed {
    /// Create a feed. Without a snapshot source the engine expects
    /// full-replacement updates on the stream itself.
    pub fn new(
        engine: DepthEngine,
        source: Option<Arc<dyn SnapshotSource>>,
        handler: Arc<dyn DepthHandler>,
        retry: RetryPolicy,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            symbol: engine.symbol().to_string(),
            engine: Arc::new(Mutex::new(engine)),
            source,
            handler,
            retry,
            metrics,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn handler(&self) -> &Arc<dyn DepthHandler> {
        &self.handler
    }

    pub fn state(&self) -> SyncState {
        self.engine.lock().state()
    }

    pub fn needs_resubscribe(&self) -> bool {
        self.engine.lock().needs_resubscribe()
    }

    /// (Re)start synchronization from scratch
    pub fn start(&self) {
        let generation = {
            let mut engine = self.engine.lock();
            match engine.mode() {
                BootstrapMode::Rest => Some(engine.begin_bootstrap()),
                BootstrapMode::InBand => {
                    engine.reset();
                    None
                }
            }
        };

        if let Some(generation) = generation {
            info!(symbol = %self.symbol, generation, "Starting depth bootstrap");
            self.spawn_bootstrap(generation);
        }
    }

    /// Tear down: drop the book and invalidate any outstanding bootstrap
    pub fn stop(&self) {
        self.engine.lock().reset();
    }

    /// Feed one decoded update; returns the new snapshot when one was produced
    pub fn feed(&self, update: DepthUpdate) -> Option<DepthSnapshot> {
        let outcome = self.engine.lock().feed(update);

        match outcome {
            FeedOutcome::Emitted(snapshot) => {
                self.metrics
                    .snapshots_emitted
                    .with_label_values(&[&self.symbol])
                    .inc();
                Some(snapshot)
            }
            FeedOutcome::Buffered => None,
            FeedOutcome::Dropped(reason) => {
                debug!(symbol = %self.symbol, reason = ?reason, "Depth update dropped");
                self.metrics
                    .updates_dropped
                    .with_label_values(&[&self.symbol])
                    .inc();
                None
            }
            FeedOutcome::Resync {
                expected,
                got,
                generation,
            } => {
                self.metrics.resyncs.with_label_values(&[&self.symbol]).inc();
                let gap = DepthSyncError::SequenceGap { expected, got };
                match generation {
                    Some(generation) => {
                        info!(symbol = %self.symbol, error = %gap, generation, "Re-bootstrapping");
                        self.spawn_bootstrap(generation);
                    }
                    None => {
                        info!(symbol = %self.symbol, error = %gap, "Waiting for a fresh in-band snapshot");
                    }
                }
                None
            }
        }
    }

    /// Current synced book, if any
    pub fn materialize(&self) -> Option<DepthSnapshot> {
        self.engine.lock().materialize()
    }

    fn spawn_bootstrap(&self, generation: u64) {
        let feed = self.clone();
        tokio::spawn(async move {
            // failures are reported to the handler inside
            let _ = feed.bootstrap(generation).await;
        });
    }

    /// Fetch a snapshot for `generation` with bounded retries and apply it.
    ///
    /// Returns `Ok(())` when the snapshot was applied or the generation was
    /// superseded while fetching.
    pub async fn bootstrap(&self, mut generation: u64) -> Result<()> {
        let Some(source) = self.source.clone() else {
            return Ok(());
        };

        loop {
            let snapshot = match self.fetch_with_retry(source.as_ref(), generation).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => return Ok(()),
                Err(e) => {
                    let failed = self.engine.lock().fail_bootstrap(generation);
                    if failed {
                        error!(symbol = %self.symbol, error = %e, "Bootstrap failed");
                        self.metrics
                            .bootstrap_failures
                            .with_label_values(&[&self.symbol])
                            .inc();
                        self.handler.on_error(&e);
                    }
                    return Err(e);
                }
            };

            let outcome = self.engine.lock().complete_bootstrap(generation, &snapshot);
            match outcome {
                BootstrapOutcome::Applied { .. } | BootstrapOutcome::Stale => return Ok(()),
                BootstrapOutcome::Resync {
                    generation: next, ..
                } => {
                    self.metrics.resyncs.with_label_values(&[&self.symbol]).inc();
                    generation = next;
                }
            }
        }
    }

    /// `Ok(None)` means the generation was superseded and the result is not needed
    async fn fetch_with_retry(
        &self,
        source: &dyn SnapshotSource,
        generation: u64,
    ) -> Result<Option<BootstrapSnapshot>> {
        let mut last_error = None;

        for attempt in 1..=self.retry.attempts {
            if self.engine.lock().generation() != generation {
                debug!(symbol = %self.symbol, generation, "Bootstrap superseded");
                return Ok(None);
            }

            self.metrics
                .bootstrap_attempts
                .with_label_values(&[&self.symbol])
                .inc();

            match source.fetch_snapshot(&self.symbol).await {
                Ok(snapshot) => return Ok(Some(snapshot)),
                Err(e) => {
                    warn!(
                        symbol = %self.symbol,
                        attempt,
                        max_attempts = self.retry.attempts,
                        error = %e,
                        "Snapshot request failed"
                    );
                    last_error = Some(e);
                    if attempt < self.retry.attempts {
                        sleep(self.retry.delay).await;
                    }
                }
            }
        }

        Err(DepthSyncError::BootstrapFailed {
            symbol: self.symbol.clone(),
            attempts: self.retry.attempts,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempts made".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{ChannelHandler, FeedEvent};
    use crate::orderbook::{PriceLevel, Sequence, UpdateKind};
    use crate::rest::MockSnapshotSource;
    use std::time::Duration;

    fn level(price: i64, quantity: i64) -> PriceLevel {
        PriceLevel::new(price.into(), quantity.into())
    }

    fn diff(prev: u64, last: u64, bids: Vec<PriceLevel>, asks: Vec<PriceLevel>) -> DepthUpdate {
        DepthUpdate {
            symbol: "BTCUSDT".to_string(),
            kind: UpdateKind::Diff,
            sequence: Some(Sequence {
                first: prev + 1,
                last,
                prev: Some(prev),
            }),
            event_time: 0,
            bids,
            asks,
        }
    }

    fn snapshot(sequence: u64) -> BootstrapSnapshot {
        BootstrapSnapshot {
            sequence,
            timestamp: 0,
            bids: vec![level(99, 3)],
            asks: vec![level(100, 5)],
        }
    }

    fn fast_retry(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            delay: Duration::from_millis(1),
        }
    }

    fn feed_with(
        source: MockSnapshotSource,
        attempts: u32,
    ) -> (DepthFeed, tokio::sync::mpsc::UnboundedReceiver<FeedEvent>) {
        let (handler, rx) = ChannelHandler::new();
        let feed = DepthFeed::new(
            DepthEngine::new("BTCUSDT", BootstrapMode::Rest),
            Some(Arc::new(source)),
            Arc::new(handler),
            fast_retry(attempts),
            Arc::new(SyncMetrics::new().unwrap()),
        );
        (feed, rx)
    }

    fn begin(feed: &DepthFeed) -> u64 {
        feed.engine.lock().begin_bootstrap()
    }

    #[tokio::test]
    async fn test_bootstrap_then_feed() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .times(1)
            .returning(|_| Ok(snapshot(10)));
        let (feed, _rx) = feed_with(source, 3);

        let generation = begin(&feed);
        assert!(feed.feed(diff(10, 11, vec![level(98, 2)], vec![])).is_none());
        feed.bootstrap(generation).await.unwrap();
        assert_eq!(feed.state(), SyncState::AwaitingFirstValidDiff);

        let out = feed
            .feed(diff(11, 12, vec![], vec![level(100, 0)]))
            .unwrap();
        assert_eq!(out.bids, vec![level(99, 3), level(98, 2)]);
        assert!(out.asks.is_empty());
    }

    #[tokio::test]
    async fn test_bootstrap_retries_then_succeeds() {
        let mut source = MockSnapshotSource::new();
        let mut calls = 0;
        source.expect_fetch_snapshot().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(DepthSyncError::RestApiError("503".to_string()))
            } else {
                Ok(snapshot(10))
            }
        });
        let (feed, _rx) = feed_with(source, 3);

        let generation = begin(&feed);
        tokio_test::assert_ok!(feed.bootstrap(generation).await);
        assert_eq!(feed.state(), SyncState::AwaitingFirstValidDiff);
    }

    #[tokio::test]
    async fn test_bootstrap_exhausted_reports_error_once() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .times(2)
            .returning(|_| Err(DepthSyncError::RestApiError("timeout".to_string())));
        let (feed, mut rx) = feed_with(source, 2);

        let generation = begin(&feed);
        let err = feed.bootstrap(generation).await.unwrap_err();
        assert!(matches!(
            err,
            DepthSyncError::BootstrapFailed { attempts: 2, .. }
        ));
        assert_eq!(feed.state(), SyncState::Uninitialized);
        assert!(feed.materialize().is_none());

        match rx.try_recv() {
            Ok(FeedEvent::Error(DepthSyncError::BootstrapFailed { symbol, .. })) => {
                assert_eq!(symbol, "BTCUSDT")
            }
            other => panic!("expected bootstrap error, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_superseded_bootstrap_is_abandoned() {
        let mut source = MockSnapshotSource::new();
        source.expect_fetch_snapshot().times(0);
        let (feed, mut rx) = feed_with(source, 3);

        let stale = begin(&feed);
        begin(&feed);
        feed.bootstrap(stale).await.unwrap();
        assert_eq!(feed.state(), SyncState::Bootstrapping);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_gap_spawns_fresh_bootstrap() {
        let mut source = MockSnapshotSource::new();
        let mut calls = 0;
        source.expect_fetch_snapshot().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(snapshot(10))
            } else {
                Ok(BootstrapSnapshot {
                    sequence: 20,
                    timestamp: 0,
                    bids: vec![level(95, 1)],
                    asks: vec![level(96, 1)],
                })
            }
        });
        let (feed, _rx) = feed_with(source, 3);

        let generation = begin(&feed);
        feed.bootstrap(generation).await.unwrap();

        // prev=15 does not continue marker 10
        assert!(feed.feed(diff(15, 16, vec![level(1, 1)], vec![])).is_none());
        assert_eq!(feed.state(), SyncState::Bootstrapping);

        for _ in 0..100 {
            if feed.state() == SyncState::AwaitingFirstValidDiff {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(feed.state(), SyncState::AwaitingFirstValidDiff);

        let out = feed.feed(diff(20, 21, vec![], vec![])).unwrap();
        assert_eq!(out.bids, vec![level(95, 1)]);
        assert_eq!(out.asks, vec![level(96, 1)]);
    }

    #[tokio::test]
    async fn test_stop_discards_book() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_snapshot()
            .returning(|_| Ok(snapshot(10)));
        let (feed, _rx) = feed_with(source, 1);

        let generation = begin(&feed);
        feed.bootstrap(generation).await.unwrap();
        feed.feed(diff(10, 11, vec![], vec![])).unwrap();

        feed.stop();
        assert_eq!(feed.state(), SyncState::Uninitialized);
        assert!(feed.materialize().is_none());
    }
}
