//! WebSocket connection manager
//!
//! Handles reconnection logic and message dispatch. Every successful
//! reconnect restarts depth synchronization for all subscribed symbols.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tracing::{error, info, warn};

use super::WebSocketClient;
use crate::config::{Config, Venue};
use crate::error::{DepthSyncError, Result};
use crate::handler::DepthHandler;
use crate::orderbook::DepthRegistry;
use crate::parser::ParsedMessage;
use crate::rest::SnapshotSource;

/// Maximum backoff delay in milliseconds (60 seconds)
const MAX_BACKOFF_MS: u64 = 60_000;
/// Cooldown period after which reconnect attempts are reset (5 minutes)
const RECONNECT_COOLDOWN_SECS: u64 = 300;

/// Transport lifecycle, independent of each book's sync state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Manages WebSocket connections with automatic reconnection
pub struct WebSocketManager {
    config: Arc<Config>,
    registry: Arc<DepthRegistry>,
    source: Arc<dyn SnapshotSource>,
    handler: Arc<dyn DepthHandler>,
    client: WebSocketClient,
    state: ConnectionState,
    connections: u64,
    reconnect_attempts: u32,
    last_successful_connection: Option<Instant>,
}

impl WebSocketManager {
    /// Create a new WebSocket manager
    pub fn new(
        config: Arc<Config>,
        registry: Arc<DepthRegistry>,
        source: Arc<dyn SnapshotSource>,
        handler: Arc<dyn DepthHandler>,
    ) -> Self {
        let client = WebSocketClient::new(
            config.venue,
            &config.ws_endpoint,
            &config.symbols,
            &config.depth_stream,
            &config.trade_stream,
        );

        Self {
            config,
            registry,
            source,
            handler,
            client,
            state: ConnectionState::Disconnected,
            connections: 0,
            reconnect_attempts: 0,
            last_successful_connection: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(from = ?self.state, to = ?state, "Connection state changed");
            self.state = state;
        }
    }

    /// Run the WebSocket manager with automatic reconnection
    pub async fn run(&mut self) -> Result<()> {
        info!(
            max_attempts = self.config.max_reconnect_attempts,
            "Starting WebSocket manager"
        );

        let status_task = self.spawn_status_logger();

        let result = loop {
            // Reset reconnect attempts if we've been stable for a while
            if let Some(last_success) = self.last_successful_connection {
                if last_success.elapsed() > Duration::from_secs(RECONNECT_COOLDOWN_SECS)
                    && self.reconnect_attempts > 0
                {
                    info!(
                        previous_attempts = self.reconnect_attempts,
                        "Resetting reconnect counter after cooldown period"
                    );
                    self.reconnect_attempts = 0;
                }
            }

            match self.connect_and_process().await {
                Ok(()) => {
                    info!("WebSocket processing completed normally, reconnecting...");
                    sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    self.client.close().await;
                    self.set_state(ConnectionState::Disconnected);
                    error!(error = %e, "WebSocket error");
                    self.reconnect_attempts += 1;

                    let max = self.config.max_reconnect_attempts;
                    if max > 0 && self.reconnect_attempts > max {
                        break Err(DepthSyncError::MaxReconnectAttemptsExceeded);
                    }

                    let delay =
                        backoff_delay(self.config.reconnect_delay_ms, self.reconnect_attempts);
                    warn!(
                        attempt = self.reconnect_attempts,
                        delay_secs = delay.as_secs(),
                        "Reconnecting after error..."
                    );
                    sleep(delay).await;
                }
            }
        };

        status_task.abort();
        if let Err(e) = &result {
            self.handler.on_error(e);
        }
        result
    }

    /// Connect and process messages
    async fn connect_and_process(&mut self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        self.client.connect().await?;
        self.set_state(ConnectionState::Connected);

        self.last_successful_connection = Some(Instant::now());
        self.reconnect_attempts = 0;
        self.connections += 1;

        // Subscribe once; afterwards any reconnect invalidates every book
        if self.connections == 1 {
            self.subscribe_all()?;
        } else {
            self.registry.resync_all();
        }

        // Process messages with keepalive
        let mut last_message = Instant::now();
        let keepalive_timeout = Duration::from_secs(30);
        let recv_timeout = Duration::from_secs(45);

        loop {
            match timeout(recv_timeout, self.client.recv()).await {
                Ok(Ok(Some(text))) => {
                    last_message = Instant::now();
                    self.process_message(&text);

                    let stale = self.registry.resubscribe_requests();
                    if !stale.is_empty() {
                        return Err(DepthSyncError::ResubscribeRequired(stale));
                    }
                }
                Ok(Ok(None)) => {
                    // Ping/pong or other non-data message
                    if last_message.elapsed() > keepalive_timeout {
                        if let Err(e) = self.client.ping().await {
                            warn!(error = %e, "Failed to send keepalive ping");
                        }
                    }
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(
                        last_message_secs = last_message.elapsed().as_secs(),
                        "No message received within timeout, sending keepalive"
                    );
                    if let Err(e) = self.client.ping().await {
                        warn!(error = %e, "Failed to send keepalive ping, reconnecting");
                        return Err(DepthSyncError::ConnectionTimeout);
                    }
                }
            }
        }
    }

    /// Register every configured symbol; in-band venues get no snapshot source
    fn subscribe_all(&self) -> Result<()> {
        for symbol in &self.config.symbols {
            if self.registry.has_symbol(symbol) {
                continue;
            }
            let source = match self.config.venue {
                Venue::Binance => Some(self.source.clone()),
                Venue::Okex => None,
            };
            self.registry.subscribe(symbol, source, self.handler.clone())?;
        }
        Ok(())
    }

    /// Process a single WebSocket message; malformed frames are dropped
    fn process_message(&self, raw: &str) {
        let parsed = match ParsedMessage::parse(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Failed to parse message, dropping");
                return;
            }
        };

        match parsed {
            ParsedMessage::Depth(updates) => {
                for update in updates {
                    self.registry.dispatch(update);
                }
            }
            ParsedMessage::Trade(trade) => self.registry.dispatch_trade(&trade),
            ParsedMessage::Unknown(msg) => {
                tracing::trace!(msg = %msg, "Unknown message type");
            }
        }
    }

    /// Periodic top-of-book log per symbol
    fn spawn_status_logger(&self) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let period = Duration::from_secs(self.config.health_check_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                for (symbol, state) in registry.states() {
                    match registry.snapshot(&symbol) {
                        Some(book) => info!(
                            symbol = %symbol,
                            mid_price = ?book.mid_price(),
                            spread = ?book.spread(),
                            bid_levels = book.bids.len(),
                            ask_levels = book.asks.len(),
                            "Order book status"
                        ),
                        None => info!(symbol = %symbol, state = ?state, "Order book not synced"),
                    }
                }
            }
        })
    }
}

/// Exponential backoff from `base_ms`, capped at [`MAX_BACKOFF_MS`]
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2u64.pow(attempt.min(6)));
    Duration::from_millis(delay.min(MAX_BACKOFF_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::ChannelHandler;
    use crate::metrics::SyncMetrics;
    use crate::orderbook::{DepthUpdate, Sequence, SyncState, UpdateKind};
    use crate::rest::MockSnapshotSource;

    fn okex_manager() -> WebSocketManager {
        let config = Config {
            venue: Venue::Okex,
            symbols: vec!["BTC-USDT".to_string()],
            depth_stream: "spot/depth".to_string(),
            ..Config::default()
        };
        let registry = Arc::new(DepthRegistry::new(
            config.retry_policy(),
            Arc::new(SyncMetrics::new().unwrap()),
        ));
        let (handler, _rx) = ChannelHandler::new();
        WebSocketManager::new(
            Arc::new(config),
            registry,
            Arc::new(MockSnapshotSource::new()),
            Arc::new(handler),
        )
    }

    fn sequenced(prev: u64, last: u64) -> DepthUpdate {
        DepthUpdate {
            symbol: "BTC-USDT".to_string(),
            kind: UpdateKind::Diff,
            sequence: Some(Sequence {
                first: prev + 1,
                last,
                prev: Some(prev),
            }),
            event_time: 0,
            bids: vec![],
            asks: vec![],
        }
    }

    #[tokio::test]
    async fn test_in_band_gap_requests_resubscribe() {
        let manager = okex_manager();
        manager.subscribe_all().unwrap();
        assert_eq!(
            manager.registry.state("BTC-USDT"),
            Some(SyncState::Uninitialized)
        );

        manager.process_message(
            r#"{"table":"spot/depth","action":"partial","data":[{"instrument_id":"BTC-USDT","asks":[["100","1","1"]],"bids":[["99","1","1"]]}]}"#,
        );
        assert!(manager.registry.is_synced("BTC-USDT"));
        assert!(manager.registry.resubscribe_requests().is_empty());

        manager.registry.dispatch(sequenced(4, 5)).unwrap();
        assert!(manager.registry.dispatch(sequenced(8, 9)).is_none());

        assert_eq!(manager.registry.resubscribe_requests(), vec!["BTC-USDT"]);
    }

    #[test]
    fn test_backoff_is_capped() {
        assert_eq!(backoff_delay(1000, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(1000, 3), Duration::from_secs(8));
        assert_eq!(backoff_delay(1000, 20), Duration::from_secs(60));
    }
}
