//! WebSocket client for combined depth/trade streams
//!
//! Handles connection, subscription, and message reception.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::Venue;
use crate::error::{DepthSyncError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    venue: Venue,
    endpoint: String,
    streams: Vec<String>,
}

impl WebSocketClient {
    /// Create a client for the depth and trade streams of each symbol.
    ///
    /// Binance streams are named `<symbol>@<stream>`, OKEx channels
    /// `<channel>:<SYMBOL>`.
    pub fn new(
        venue: Venue,
        endpoint: &str,
        symbols: &[String],
        depth_stream: &str,
        trade_stream: &str,
    ) -> Self {
        let streams = symbols
            .iter()
            .flat_map(|s| match venue {
                Venue::Binance => {
                    let s_lower = s.to_lowercase();
                    [
                        format!("{}@{}", s_lower, depth_stream),
                        format!("{}@{}", s_lower, trade_stream),
                    ]
                }
                Venue::Okex => {
                    let s_upper = s.to_uppercase();
                    [
                        format!("{}:{}", depth_stream, s_upper),
                        format!("{}:{}", trade_stream, s_upper),
                    ]
                }
            })
            .collect();

        Self {
            stream: None,
            venue,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            streams,
        }
    }

    /// Connection URL; Binance encodes the streams in it
    pub fn url(&self) -> String {
        match self.venue {
            Venue::Binance => {
                format!("{}/stream?streams={}", self.endpoint, self.streams.join("/"))
            }
            Venue::Okex => self.endpoint.clone(),
        }
    }

    /// Frame sent right after connecting, if the venue needs one
    pub fn subscribe_message(&self) -> Option<String> {
        match self.venue {
            Venue::Binance => None,
            Venue::Okex => Some(
                serde_json::json!({
                    "op": "subscribe",
                    "args": self.streams,
                })
                .to_string(),
            ),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.url();
        info!(url = %url, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(&url).await.map_err(|e| {
            DepthSyncError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        let mut ws_stream = ws_stream;

        if let Some(subscribe) = self.subscribe_message() {
            debug!(channels = self.streams.len(), "Sending subscription");
            ws_stream
                .send(Message::Text(subscribe))
                .await
                .map_err(|e| DepthSyncError::WebSocketMessage(e.to_string()))?;
        }

        self.stream = Some(ws_stream);
        Ok(())
    }

    /// Receive the next data frame; `Ok(None)` for control frames
    pub async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DepthSyncError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Err(DepthSyncError::WebSocketConnection(
                    "Connection closed".to_string(),
                ))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(DepthSyncError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Err(DepthSyncError::WebSocketConnection(
                    "Stream ended".to_string(),
                ))
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| DepthSyncError::WebSocketMessage(e.to_string()))?;
        }
        Ok(())
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}
