//! Prometheus counters for depth synchronization

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::{DepthSyncError, Result};

/// Per-symbol synchronization counters
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    pub snapshots_emitted: IntCounterVec,
    pub resyncs: IntCounterVec,
    pub bootstrap_attempts: IntCounterVec,
    pub bootstrap_failures: IntCounterVec,
    pub updates_dropped: IntCounterVec,
}

impl SyncMetrics {
    /// Create counters in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let snapshots_emitted = counter(
            &registry,
            "depth_snapshots_emitted_total",
            "Depth snapshots delivered to subscribers",
        )?;
        let resyncs = counter(
            &registry,
            "depth_resyncs_total",
            "Sequence gaps that forced a resync",
        )?;
        let bootstrap_attempts = counter(
            &registry,
            "depth_bootstrap_attempts_total",
            "Bootstrap snapshot requests",
        )?;
        let bootstrap_failures = counter(
            &registry,
            "depth_bootstrap_failures_total",
            "Bootstraps abandoned after exhausting retries",
        )?;
        let updates_dropped = counter(
            &registry,
            "depth_updates_dropped_total",
            "Depth updates dropped as stale, duplicate or unsynced",
        )?;

        Ok(Self {
            registry,
            snapshots_emitted,
            resyncs,
            bootstrap_attempts,
            bootstrap_failures,
            updates_dropped,
        })
    }

    /// Render all counters in the Prometheus text format
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| DepthSyncError::MetricsError(e.to_string()))
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounterVec> {
    let counter = IntCounterVec::new(Opts::new(name, help), &["symbol"])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_contains_labelled_counter() {
        let metrics = SyncMetrics::new().unwrap();
        metrics.resyncs.with_label_values(&["BTCUSDT"]).inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("depth_resyncs_total{symbol=\"BTCUSDT\"} 1"));
    }

    #[test]
    fn test_registries_are_independent() {
        let first = SyncMetrics::new().unwrap();
        let second = SyncMetrics::new().unwrap();
        first.snapshots_emitted.with_label_values(&["ETHUSDT"]).inc();
        assert_eq!(
            second
                .snapshots_emitted
                .with_label_values(&["ETHUSDT"])
                .get(),
            0
        );
    }
}
