//! WebSocket connection manager.
//!
//! Connection lifecycle, reconnect backoff and stream configuration. The
//! state machine here is pure so it can be driven without real sockets.

use rand::Rng;
use std::time::Duration;

/// Connection state for the ledger stream.
///
/// `Connecting -> Connected -> Disconnected(reason) -> Reconnecting -> Connected`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected(String),
    Reconnecting { attempt: u32, delay: Duration },
}

impl ConnectionState {
    /// Transition to connected state.
    pub fn on_connected(self) -> Self {
        ConnectionState::Connected
    }

    /// Transition after the link dropped or a connect attempt failed.
    pub fn on_failure(self, reason: impl Into<String>) -> Self {
        ConnectionState::Disconnected(reason.into())
    }

    /// Schedule the next attempt.
    ///
    /// `previous_attempt` is the attempt counter of the last reconnect and
    /// `uptime` how long the dropped connection was up. A connection that
    /// stayed up for `policy.stable_after` resets the counter.
    pub fn schedule_reconnect(
        self,
        previous_attempt: u32,
        uptime: Duration,
        policy: &ReconnectPolicy,
    ) -> Self {
        let attempt = if uptime >= policy.stable_after {
            1
        } else {
            previous_attempt.saturating_add(1)
        };
        ConnectionState::Reconnecting {
            attempt,
            delay: policy.delay_for(attempt),
        }
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Current attempt counter, zero unless reconnecting.
    pub fn attempt(&self) -> u32 {
        match self {
            ConnectionState::Reconnecting { attempt, .. } => *attempt,
            _ => 0,
        }
    }
}

/// Exponential reconnect backoff.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay for the first retry.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Uptime after which a connection counts as stable.
    pub stable_after: Duration,
    /// Random spread applied on top of the computed delay (0.0 - 1.0).
    pub jitter_pct: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            max_delay: Duration::from_millis(300_000),
            stable_after: Duration::from_secs(300),
            jitter_pct: 0.1,
        }
    }
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let base = base_delay_ms.max(1);
        Self {
            base_delay: Duration::from_millis(base),
            max_delay: Duration::from_millis(max_delay_ms.max(base)),
            ..Default::default()
        }
    }

    /// Delay before attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt - 1)`, exponent capped at 8, result capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let power = attempt.saturating_sub(1).min(8);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64 << power);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }

    /// Apply random jitter to a delay, keeping it within `max_delay`.
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_pct <= 0.0 {
            return delay;
        }
        let spread = (delay.as_millis() as f64 * self.jitter_pct.clamp(0.0, 1.0)) as i64;
        if spread == 0 {
            return delay;
        }
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        let millis = (delay.as_millis() as i64).saturating_add(delta).max(0) as u64;
        Duration::from_millis(millis).min(self.max_delay)
    }
}

/// Configuration for the ledger stream connection.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket URL of a ledger server.
    pub ws_url: String,
    /// Reconnect backoff.
    pub reconnect: ReconnectPolicy,
    /// Ping interval to keep the connection alive (ms).
    pub ping_interval_ms: u64,
    /// Max wait for a pong after a ping (ms).
    pub pong_timeout_ms: u64,
    /// Force a reconnect when no text frame arrived for this long (ms).
    /// Pongs keep the socket alive but do not count as stream data.
    pub stale_timeout_ms: u64,
    /// Connection timeout (ms).
    pub connect_timeout_ms: u64,
    /// Buffer size of the channel towards the monitor.
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://xrplcluster.com/".to_string(),
            reconnect: ReconnectPolicy::default(),
            ping_interval_ms: 20_000,
            pong_timeout_ms: 30_000,
            stale_timeout_ms: 120_000,
            connect_timeout_ms: 10_000,
            channel_capacity: 64,
        }
    }
}

impl StreamConfig {
    /// Config pointing at a specific server.
    pub fn for_url(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_state_transitions() {
        let policy = ReconnectPolicy::new(1000, 60_000);
        let mut state = ConnectionState::Connecting;

        state = state.on_connected();
        assert!(state.is_connected());

        state = state.on_failure("stream ended");
        assert_eq!(state, ConnectionState::Disconnected("stream ended".to_string()));

        state = state.schedule_reconnect(0, Duration::from_secs(1), &policy);
        assert_eq!(
            state,
            ConnectionState::Reconnecting {
                attempt: 1,
                delay: Duration::from_millis(1000)
            }
        );

        state = state.on_connected();
        assert!(state.is_connected());
        assert_eq!(state.attempt(), 0);
    }

    #[test]
    fn test_attempts_accumulate_on_flapping_connection() {
        let policy = ReconnectPolicy::new(1000, 60_000);
        let mut attempt = 0;
        let mut delays = Vec::new();
        for _ in 0..4 {
            let state = ConnectionState::Connected
                .on_failure("reset")
                .schedule_reconnect(attempt, Duration::from_secs(2), &policy);
            attempt = state.attempt();
            if let ConnectionState::Reconnecting { delay, .. } = state {
                delays.push(delay.as_millis() as u64);
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000]);
    }

    #[test]
    fn test_stable_connection_resets_attempts() {
        let policy = ReconnectPolicy::new(1000, 60_000);
        let state = ConnectionState::Connected
            .on_failure("reset")
            .schedule_reconnect(6, Duration::from_secs(600), &policy);
        assert_eq!(state.attempt(), 1);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = ReconnectPolicy::new(5000, 300_000);
        assert_eq!(policy.delay_for(1), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for(6), Duration::from_millis(160_000));
        assert_eq!(policy.delay_for(7), Duration::from_millis(300_000));
        assert_eq!(policy.delay_for(50), Duration::from_millis(300_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = ReconnectPolicy {
            jitter_pct: 0.2,
            ..ReconnectPolicy::new(1000, 10_000)
        };
        for _ in 0..100 {
            let delay = policy.jittered(Duration::from_millis(1000));
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));
        }
    }

    #[test]
    fn test_stream_config_default() {
        let config = StreamConfig::default();
        assert!(config.ws_url.starts_with("wss://"));
        assert!(config.ping_interval_ms > 0);
        assert!(config.stale_timeout_ms > config.ping_interval_ms);
    }
}
