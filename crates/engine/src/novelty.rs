//! Novelty tracking: which tokens have already been alerted on.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokenwatch_core::{LedgerIndex, TokenId};

/// Persistence backend failure. Never fatal to classification.
#[derive(Debug, Error)]
#[error("Novelty store error: {0}")]
pub struct StoreError(pub String);

/// Durable record of seen tokens.
#[async_trait]
pub trait NoveltyStore: Send + Sync {
    /// All tokens recorded so far.
    async fn load_seen(&self) -> Result<Vec<TokenId>, StoreError>;

    /// Record a token first seen in `ledger_index`.
    async fn record_seen(&self, token: &TokenId, ledger_index: LedgerIndex) -> Result<(), StoreError>;
}

/// Process-wide set of seen tokens with atomic check-and-insert.
#[derive(Debug, Default)]
pub struct NoveltySet {
    seen: DashMap<TokenId, LedgerIndex>,
}

impl NoveltySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set already containing `tokens`.
    pub fn seeded(tokens: impl IntoIterator<Item = TokenId>) -> Self {
        let set = Self::new();
        set.seed(tokens);
        set
    }

    /// Add tokens without reporting them as new.
    pub fn seed(&self, tokens: impl IntoIterator<Item = TokenId>) {
        for token in tokens {
            self.seen.entry(token).or_insert(0);
        }
    }

    /// Mark a token as seen. Returns `true` only for the first caller.
    pub fn mark_seen(&self, token: &TokenId, ledger_index: LedgerIndex) -> bool {
        match self.seen.entry(token.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(ledger_index);
                true
            }
        }
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        self.seen.contains_key(token)
    }

    /// Ledger in which the token was first seen (0 when seeded).
    pub fn first_seen(&self, token: &TokenId) -> Option<LedgerIndex> {
        self.seen.get(token).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
