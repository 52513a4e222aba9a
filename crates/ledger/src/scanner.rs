//! Ledger range scanner.
//!
//! Fetches the transactions of a ledger delta and keeps the ones that
//! establish a trust line, the earliest on-ledger signal of a new token.

use crate::message::{Amount, TransactionRecord};
use crate::RangeSource;
use serde_json::Value;
use tokenwatch_core::{LedgerRange, TrustLineCandidate};
use tracing::{debug, warn};

/// Transaction type that creates or modifies a trust line.
pub const TRUST_SET: &str = "TrustSet";

/// Result of scanning one ledger range.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub range: LedgerRange,
    /// Trust-line candidates in ledger order as returned by the server.
    pub candidates: Vec<TrustLineCandidate>,
    /// Number of transactions the server returned.
    pub fetched: usize,
    /// The fetch failed; the range yielded nothing.
    pub failed: bool,
}

/// Scans ledger ranges through a [`RangeSource`]. Never touches the cursor.
pub struct RangeScanner<S> {
    source: S,
}

impl<S: RangeSource> RangeScanner<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Fetch `(range.start, range.end]` and extract trust-line candidates.
    ///
    /// A fetch failure is logged and reported as `failed` with zero candidates.
    pub async fn scan(&self, range: LedgerRange) -> ScanOutcome {
        let transactions = match self.source.fetch_range(range).await {
            Ok(transactions) => transactions,
            Err(e) => {
                warn!(%range, ledgers = range.len(), error = %e, "Range fetch failed, skipping range");
                return ScanOutcome {
                    range,
                    candidates: Vec::new(),
                    fetched: 0,
                    failed: true,
                };
            }
        };

        let candidates: Vec<TrustLineCandidate> = transactions
            .iter()
            .filter_map(|tx| trust_line_candidate(tx, range))
            .collect();

        debug!(
            %range,
            fetched = transactions.len(),
            candidates = candidates.len(),
            "Range scanned"
        );

        ScanOutcome {
            range,
            candidates,
            fetched: transactions.len(),
            failed: false,
        }
    }
}

/// Turn a raw transaction into a candidate if it establishes a trust line
/// inside `range`.
///
/// Skips other transaction types, malformed records, trust lines with a zero
/// limit (those remove a line) and transactions outside the range.
pub fn trust_line_candidate(tx: &Value, range: LedgerRange) -> Option<TrustLineCandidate> {
    let record = match TransactionRecord::from_value(tx) {
        Ok(record) => record,
        Err(e) => {
            debug!(error = %e, "Skipping malformed transaction");
            return None;
        }
    };

    if record.transaction_type != TRUST_SET {
        return None;
    }

    let (currency, issuer, value) = match record.limit_amount.as_ref()? {
        Amount::Issued {
            currency,
            issuer,
            value,
        } => (currency, issuer, value),
        Amount::Drops(_) => return None,
    };

    if value.trim().parse::<f64>().map_or(false, |limit| limit == 0.0) {
        return None;
    }

    let ledger_index = match record.ledger() {
        Some(index) if !range.contains(index) => {
            debug!(ledger_index = index, %range, "Skipping transaction outside scanned range");
            return None;
        }
        Some(index) => index,
        None => range.end,
    };

    Some(TrustLineCandidate {
        issuer: issuer.clone(),
        currency: currency.clone(),
        ledger_index,
        account: record.account.clone(),
        tx_hash: record.hash.clone(),
    })
}
