//! Error types for ledger stream operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the ledger network.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket disconnected: {0}")]
    Disconnected(String),

    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Ledger server error: {0}")]
    Rpc(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Channel closed")]
    ChannelClosed,
}

impl From<tokio_tungstenite::tungstenite::Error> for LedgerError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LedgerError::ConnectionFailed(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::ParseError(err.to_string())
    }
}

impl From<url::ParseError> for LedgerError {
    fn from(err: url::ParseError) -> Self {
        LedgerError::ConnectionFailed(err.to_string())
    }
}

impl LedgerError {
    /// Returns true if this error is a transport fault that a reconnect may fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::ConnectionFailed(_)
                | LedgerError::Disconnected(_)
                | LedgerError::Timeout(_)
                | LedgerError::SubscriptionFailed(_)
        )
    }

    /// Suggested delay before retrying, `None` when retrying is pointless.
    pub fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            LedgerError::ConnectionFailed(_) => Some(Duration::from_secs(5)),
            LedgerError::Disconnected(_) => Some(Duration::from_secs(2)),
            LedgerError::Timeout(_) => Some(Duration::from_secs(2)),
            LedgerError::SubscriptionFailed(_) => Some(Duration::from_secs(5)),
            LedgerError::Rpc(_) | LedgerError::ParseError(_) | LedgerError::ChannelClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        assert!(LedgerError::Disconnected("eof".into()).is_transient());
        assert!(LedgerError::Timeout("scan".into()).is_transient());
        assert!(!LedgerError::Rpc("lgrNotFound".into()).is_transient());
        assert!(!LedgerError::ParseError("bad json".into()).is_transient());
    }

    #[test]
    fn test_retry_delay() {
        assert_eq!(
            LedgerError::ConnectionFailed("refused".into()).suggested_retry_delay(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(LedgerError::ChannelClosed.suggested_retry_delay(), None);
    }
}
