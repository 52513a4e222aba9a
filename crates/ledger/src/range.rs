//! Transaction range fetching.

use crate::message::{extract_transactions, tx_history_request};
use crate::LedgerError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokenwatch_core::LedgerRange;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::debug;

/// Source of transactions for a ledger range.
#[async_trait]
pub trait RangeSource: Send + Sync {
    /// Fetch the raw transactions validated in `(range.start, range.end]`.
    async fn fetch_range(&self, range: LedgerRange) -> Result<Vec<Value>, LedgerError>;
}

/// Fetches a range over a short-lived WebSocket with one correlated
/// request/response exchange.
pub struct WsRangeSource {
    ws_url: String,
    request_timeout: Duration,
    next_id: AtomicU64,
}

impl WsRangeSource {
    pub fn new(ws_url: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.into(),
            request_timeout,
            // Ids below 1000 are left to the stream connection.
            next_id: AtomicU64::new(1000),
        }
    }

    async fn exchange(&self, id: u64, range: LedgerRange) -> Result<Vec<Value>, LedgerError> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        write.send(Message::Text(tx_history_request(id, range))).await?;

        let result = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(&text)?;
                    // Servers may interleave unrelated frames; only our id counts.
                    match frame.get("id").and_then(Value::as_u64) {
                        Some(frame_id) if frame_id == id => break extract_transactions(&frame),
                        _ => {
                            debug!(id, "Ignoring uncorrelated frame during range fetch");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => {
                    break Err(LedgerError::Disconnected(
                        "connection closed before range reply".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(LedgerError::ConnectionFailed(e.to_string())),
            }
        };

        let _ = write.send(Message::Close(None)).await;
        result
    }
}

#[async_trait]
impl RangeSource for WsRangeSource {
    async fn fetch_range(&self, range: LedgerRange) -> Result<Vec<Value>, LedgerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(id, %range, "Requesting transaction range");

        match tokio::time::timeout(self.request_timeout, self.exchange(id, range)).await {
            Ok(result) => result,
            Err(_) => Err(LedgerError::Timeout(format!(
                "range {} not answered within {:?}",
                range, self.request_timeout
            ))),
        }
    }
}
