//! Wire messages exchanged with a ledger server.
//!
//! Requests are built as JSON strings; inbound frames are parsed into
//! [`StreamEvent`]. Transactions are kept as raw JSON until the scanner
//! picks the ones it cares about.

use crate::LedgerError;
use serde::Deserialize;
use serde_json::{json, Value};
use tokenwatch_core::{LedgerIndex, LedgerRange};

/// `subscribe` request for the ledger-closed stream.
pub fn subscribe_ledger_request(id: u64) -> String {
    json!({
        "id": id,
        "command": "subscribe",
        "streams": ["ledger"],
    })
    .to_string()
}

/// Transaction history request for the range `(start, end]`.
pub fn tx_history_request(id: u64, range: LedgerRange) -> String {
    json!({
        "id": id,
        "command": "tx_history",
        "start": range.start,
        "end": range.end,
    })
    .to_string()
}

/// Ledger-closed notification.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedgerClosed {
    pub ledger_index: LedgerIndex,
    #[serde(default)]
    pub ledger_hash: Option<String>,
    #[serde(default)]
    pub txn_count: Option<u32>,
}

/// Reply to a request sent on the socket.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl ResponseFrame {
    /// Numeric request id echoed back by the server.
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    pub fn is_error(&self) -> bool {
        self.status.as_deref() == Some("error") || self.error.is_some()
    }

    /// Error text suitable for logs.
    pub fn error_text(&self) -> String {
        self.error_message
            .clone()
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "unknown error".to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawFrame {
    #[serde(rename = "ledgerClosed")]
    LedgerClosed(LedgerClosed),
    #[serde(rename = "response")]
    Response(ResponseFrame),
    #[serde(other)]
    Other,
}

/// Parsed inbound frame.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    LedgerClosed(LedgerClosed),
    Response(ResponseFrame),
    /// Any other stream (validations, server status, ...).
    Other,
}

impl StreamEvent {
    pub fn parse(text: &str) -> Result<Self, LedgerError> {
        let frame: RawFrame = serde_json::from_str(text)?;
        Ok(match frame {
            RawFrame::LedgerClosed(closed) => StreamEvent::LedgerClosed(closed),
            RawFrame::Response(response) => StreamEvent::Response(response),
            RawFrame::Other => StreamEvent::Other,
        })
    }
}

/// Pull the transaction list out of a history reply.
///
/// Servers differ in where they put it: top-level `transactions`,
/// `result.transactions` or `result.txs`.
pub fn extract_transactions(frame: &Value) -> Result<Vec<Value>, LedgerError> {
    if frame.get("status").and_then(Value::as_str) == Some("error") {
        let message = frame
            .get("error_message")
            .or_else(|| frame.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(LedgerError::Rpc(message.to_string()));
    }

    let list = frame
        .get("transactions")
        .or_else(|| frame.pointer("/result/transactions"))
        .or_else(|| frame.pointer("/result/txs"));

    match list {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Err(LedgerError::ParseError(format!(
            "transactions is not an array: {}",
            other
        ))),
    }
}

/// Amount field: issued currency object or native drops string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Issued {
        currency: String,
        issuer: String,
        value: String,
    },
    Drops(String),
}

/// The transaction fields the scanner needs.
#[derive(Debug, Clone, Deserialize)]
pub struct TransactionRecord {
    #[serde(rename = "TransactionType")]
    pub transaction_type: String,
    #[serde(rename = "Account", default)]
    pub account: Option<String>,
    #[serde(rename = "LimitAmount", default)]
    pub limit_amount: Option<Amount>,
    #[serde(default)]
    pub ledger_index: Option<LedgerIndex>,
    #[serde(rename = "inLedger", default)]
    pub in_ledger: Option<LedgerIndex>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl TransactionRecord {
    /// Parse a transaction, unwrapping `tx` / `tx_json` envelopes.
    pub fn from_value(value: &Value) -> Result<Self, LedgerError> {
        let inner = value
            .get("tx_json")
            .or_else(|| value.get("tx"))
            .filter(|v| v.is_object())
            .unwrap_or(value);

        let mut record: TransactionRecord = serde_json::from_value(inner.clone())?;

        if record.ledger_index.is_none() {
            record.ledger_index = value
                .get("ledger_index")
                .and_then(Value::as_u64)
                .and_then(|v| LedgerIndex::try_from(v).ok());
        }
        if record.hash.is_none() {
            record.hash = value.get("hash").and_then(Value::as_str).map(str::to_string);
        }
        Ok(record)
    }

    /// Ledger the transaction was validated in.
    pub fn ledger(&self) -> Option<LedgerIndex> {
        self.ledger_index.or(self.in_ledger)
    }
}
