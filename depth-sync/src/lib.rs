//! depth-sync - incremental order book reconstruction
//!
//! Maintains consistent full-depth books from exchange depth streams:
//! bootstrap snapshots, diff reconciliation, gap detection and resync.

pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod orderbook;
pub mod parser;
pub mod rest;
pub mod websocket;

pub use config::{Config, RetryPolicy, Venue};
pub use error::{DepthSyncError, Result};
pub use handler::{ChannelHandler, DepthHandler, FeedEvent, LoggingHandler};
pub use metrics::SyncMetrics;
pub use orderbook::{
    BootstrapSnapshot, DepthEngine, DepthFeed, DepthRegistry, DepthSnapshot, DepthUpdate,
    PriceLevel, Sequence, Side, SubscriptionHandle, SyncState, UpdateKind,
};
pub use parser::{ParsedMessage, Trade};
pub use rest::{RestSnapshotSource, SnapshotSource};
pub use websocket::{ConnectionState, WebSocketManager};
