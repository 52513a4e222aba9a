//! WebSocket client for the ledger stream.

use crate::message::{subscribe_ledger_request, StreamEvent};
use crate::{ConnectionState, LedgerError, StreamConfig};
use futures_util::{SinkExt, StreamExt};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Request id used for the stream subscription.
const SUBSCRIBE_REQUEST_ID: u64 = 1;

/// Message forwarded from the WebSocket to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    /// Text frame (JSON).
    Text(String),
    /// Connection established and subscription sent (first time).
    Connected,
    /// Connection re-established after a drop; subscription sent again.
    Reconnected,
    /// Connection lost; a reconnect is scheduled.
    Disconnected(String),
}

/// Holds the single streaming connection to a ledger server.
pub struct WsClient {
    config: StreamConfig,
    tx: mpsc::Sender<WsMessage>,
}

impl WsClient {
    /// Create a new WebSocket client.
    pub fn new(config: StreamConfig, tx: mpsc::Sender<WsMessage>) -> Self {
        Self { config, tx }
    }

    /// Connect and keep the ledger subscription alive.
    ///
    /// Reconnects forever with exponential backoff. Returns only once the
    /// receiving side of the channel has been dropped.
    pub async fn run(self) -> Result<(), LedgerError> {
        let policy = self.config.reconnect.clone();
        let mut state = ConnectionState::Connecting;
        let mut attempt = 0u32;
        let mut has_connected_once = false;

        loop {
            let started = Instant::now();
            let result = self.connect_and_handle(has_connected_once, &mut state).await;
            let uptime = started.elapsed();

            let reason = match result {
                Err(LedgerError::ChannelClosed) => {
                    info!("Ledger stream consumer gone, stopping WebSocket client");
                    return Ok(());
                }
                Ok(()) => "closed by server".to_string(),
                Err(e) => e.to_string(),
            };

            if state.is_connected() {
                has_connected_once = true;
            }

            state = state
                .on_failure(reason.clone())
                .schedule_reconnect(attempt, uptime, &policy);
            attempt = state.attempt();

            let delay = match &state {
                ConnectionState::Reconnecting { delay, .. } => policy.jittered(*delay),
                _ => policy.base_delay,
            };

            warn!(
                url = %self.config.ws_url,
                uptime = ?uptime,
                attempt,
                "Ledger stream error: {}. Reconnecting in {:.1}s",
                reason,
                delay.as_secs_f64()
            );

            if self.tx.send(WsMessage::Disconnected(reason)).await.is_err() {
                return Ok(());
            }

            tokio::time::sleep(delay).await;
            state = ConnectionState::Connecting;
        }
    }

    async fn connect_and_handle(
        &self,
        is_reconnect: bool,
        state: &mut ConnectionState,
    ) -> Result<(), LedgerError> {
        debug!("Connecting to ledger stream: {}", self.config.ws_url);

        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (ws_stream, response) =
            match tokio::time::timeout(connect_timeout, connect_async(&self.config.ws_url)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(LedgerError::Timeout(format!(
                        "connect to {} timed out after {:?}",
                        self.config.ws_url, connect_timeout
                    )))
                }
            };
        debug!("Ledger stream connected (status: {:?})", response.status());

        let (mut write, mut read) = ws_stream.split();

        write
            .send(Message::Text(subscribe_ledger_request(SUBSCRIBE_REQUEST_ID)))
            .await
            .map_err(|e| LedgerError::SubscriptionFailed(e.to_string()))?;

        *state = state.clone().on_connected();
        let event = if is_reconnect {
            info!("Ledger stream reconnected, ledger subscription renewed");
            WsMessage::Reconnected
        } else {
            info!("Ledger stream connected, subscribed to ledger stream");
            WsMessage::Connected
        };
        self.tx
            .send(event)
            .await
            .map_err(|_| LedgerError::ChannelClosed)?;

        let ping_interval = Duration::from_millis(self.config.ping_interval_ms);
        let mut ping_timer = tokio::time::interval(ping_interval);
        ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Silent disconnects: the socket answers pings but no stream data arrives.
        let stale_timeout = Duration::from_millis(self.config.stale_timeout_ms);
        let pong_timeout = Duration::from_millis(self.config.pong_timeout_ms);
        let mut last_data_time = Instant::now();
        let mut awaiting_pong = false;
        let mut ping_sent_time = Instant::now();
        let mut dropped = 0u64;

        loop {
            if last_data_time.elapsed() > stale_timeout {
                return Err(LedgerError::Disconnected(format!(
                    "no stream data received for {:?}",
                    last_data_time.elapsed()
                )));
            }

            if awaiting_pong && ping_sent_time.elapsed() > pong_timeout {
                return Err(LedgerError::Disconnected(format!(
                    "no pong received for {:?}",
                    ping_sent_time.elapsed()
                )));
            }

            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_data_time = Instant::now();

                            if let Some(reason) = subscription_rejection(&text) {
                                return Err(LedgerError::SubscriptionFailed(reason));
                            }

                            // A lagging consumer loses nothing by a dropped notification:
                            // the next one scans from the cursor and covers the gap.
                            match self.tx.try_send(WsMessage::Text(text)) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    dropped += 1;
                                    debug!(dropped, "Monitor busy, dropping ledger stream frame");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    return Err(LedgerError::ChannelClosed);
                                }
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                return Err(LedgerError::ConnectionFailed(format!("PONG send failed: {}", e)));
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            awaiting_pong = false;
                            debug!("Ledger stream PONG (latency: {:?})", ping_sent_time.elapsed());
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("Ledger stream close frame: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(other)) => {
                            debug!("Ignoring ledger stream frame: {:?}", other);
                        }
                        Some(Err(e)) => {
                            error!("Ledger stream read error: {}", e);
                            return Err(LedgerError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return Err(LedgerError::Disconnected("stream ended".to_string()));
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        return Err(LedgerError::ConnectionFailed(format!("PING failed: {}", e)));
                    }
                    if !awaiting_pong {
                        awaiting_pong = true;
                        ping_sent_time = Instant::now();
                    }
                }
            }
        }
    }
}

/// Error text when `text` is the server refusing our ledger subscription.
fn subscription_rejection(text: &str) -> Option<String> {
    if !text.contains("error") {
        return None;
    }
    match StreamEvent::parse(text) {
        Ok(StreamEvent::Response(response))
            if response.request_id() == Some(SUBSCRIBE_REQUEST_ID) && response.is_error() =>
        {
            Some(response.error_text())
        }
        _ => None,
    }
}

/// Spawn a [`WsClient`] and return the receiving end of its channel.
pub fn spawn_stream(config: StreamConfig) -> (mpsc::Receiver<WsMessage>, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let url = config.ws_url.clone();
    let client = WsClient::new(config, tx);

    let handle = tokio::spawn(async move {
        if let Err(e) = client.run().await {
            error!(url = %url, "Ledger stream client stopped: {}", e);
        }
    });

    (rx, handle)
}
