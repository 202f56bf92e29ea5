//! Bootstrap snapshot sources
//!
//! The engine only needs one REST call: a full depth image plus the update ID
//! it is consistent with.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DepthSyncError, Result};
use crate::orderbook::BootstrapSnapshot;
use crate::parser::RestDepthSnapshot;

/// Provides bootstrap snapshots for a symbol
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<BootstrapSnapshot>;
}

/// Binance-style `/depth?symbol=..&limit=..` endpoint
#[derive(Debug, Clone)]
pub struct RestSnapshotSource {
    client: reqwest::Client,
    endpoint: String,
    limit: usize,
}

impl RestSnapshotSource {
    pub fn new(endpoint: &str, limit: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            limit,
        })
    }

    /// Full request URL for a symbol
    pub fn url(&self, symbol: &str) -> String {
        format!(
            "{}/depth?symbol={}&limit={}",
            self.endpoint,
            symbol.to_uppercase(),
            self.limit
        )
    }
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch_snapshot(&self, symbol: &str) -> Result<BootstrapSnapshot> {
        let url = self.url(symbol);
        info!(symbol = %symbol, url = %url, "Fetching order book snapshot");

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DepthSyncError::RestApiError(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        let snapshot = response.json::<RestDepthSnapshot>().await?;
        debug!(
            symbol = %symbol,
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Snapshot received"
        );

        Ok(snapshot.into_bootstrap(chrono::Utc::now().timestamp_millis().max(0) as u64))
    }
}
