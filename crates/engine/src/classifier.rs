//! Token classifier.
//!
//! Resolves trust-line candidates to token identities, decides novelty and
//! enriches new tokens with market data.

use crate::{MarketDataSource, NoveltySet, NoveltyStore};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tokenwatch_core::{TokenDescriptor, TokenId, TokenParseError, TrustLineCandidate};
use tracing::{debug, info, warn};

/// Per-candidate classification failure.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("Invalid token {currency}.{issuer}: {source}")]
    InvalidToken {
        issuer: String,
        currency: String,
        #[source]
        source: TokenParseError,
    },
}

/// Classifier settings.
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Upper bound on market-data lookups in flight for one batch.
    pub max_concurrent_lookups: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: 4,
        }
    }
}

/// Turns candidates into [`TokenDescriptor`]s.
pub struct TokenClassifier {
    config: ClassifierConfig,
    market: Arc<dyn MarketDataSource>,
    novelty: Arc<NoveltySet>,
    store: Option<Arc<dyn NoveltyStore>>,
}

impl TokenClassifier {
    pub fn new(
        config: ClassifierConfig,
        market: Arc<dyn MarketDataSource>,
        novelty: Arc<NoveltySet>,
    ) -> Self {
        Self {
            config,
            market,
            novelty,
            store: None,
        }
    }

    /// Persist newly seen tokens to `store`.
    pub fn with_store(mut self, store: Arc<dyn NoveltyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn novelty(&self) -> &Arc<NoveltySet> {
        &self.novelty
    }

    /// Classify one candidate.
    ///
    /// Only tokens seen for the first time are looked up; a failed lookup
    /// leaves `market` empty.
    pub async fn classify(
        &self,
        candidate: &TrustLineCandidate,
    ) -> Result<TokenDescriptor, ClassifyError> {
        let token = TokenId::parse(&candidate.issuer, &candidate.currency).map_err(|source| {
            ClassifyError::InvalidToken {
                issuer: candidate.issuer.clone(),
                currency: candidate.currency.clone(),
                source,
            }
        })?;

        let is_new = self.novelty.mark_seen(&token, candidate.ledger_index);
        if !is_new {
            debug!(token = %token, "Token already seen");
            return Ok(TokenDescriptor {
                token,
                ledger_index: candidate.ledger_index,
                is_new: false,
                market: None,
            });
        }

        info!(
            issuer = %token.issuer,
            currency = %token.currency,
            ledger_index = candidate.ledger_index,
            "New token observed"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.record_seen(&token, candidate.ledger_index).await {
                warn!(token = %token, error = %e, "Failed to persist seen token");
            }
        }

        let market = match self.market.lookup(&token).await {
            Ok(data) => data,
            Err(e) => {
                warn!(token = %token, error = %e, "Market data lookup failed");
                None
            }
        };

        Ok(TokenDescriptor {
            token,
            ledger_index: candidate.ledger_index,
            is_new: true,
            market,
        })
    }

    /// Classify a batch with bounded concurrency.
    ///
    /// Output keeps candidate order. Failed candidates are logged and left out.
    pub async fn classify_batch(&self, candidates: &[TrustLineCandidate]) -> Vec<TokenDescriptor> {
        let limit = self.config.max_concurrent_lookups.max(1);

        let results: Vec<_> = stream::iter(candidates.iter().cloned())
            .map(|candidate| async move { self.classify(&candidate).await })
            .buffered(limit)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(descriptor) => Some(descriptor),
                Err(e) => {
                    debug!(error = %e, "Skipping candidate");
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MarketDataError, StoreError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokenwatch_core::{LedgerIndex, MarketData};

    const ISSUER: &str = "rvYAfWj5gh67oV6fW32ZzP3Aw4Eubs59B";

    #[derive(Default)]
    struct FakeMarket {
        lookups: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl MarketDataSource for FakeMarket {
        async fn lookup(&self, token: &TokenId) -> Result<Option<MarketData>, MarketDataError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return Err(MarketDataError::Status(500));
            }
            Ok(Some(MarketData {
                name: Some(format!("{} Token", token.currency)),
                ..Default::default()
            }))
        }
    }

    #[derive(Default)]
    struct FakeStore {
        recorded: Mutex<Vec<(TokenId, LedgerIndex)>>,
    }

    #[async_trait]
    impl NoveltyStore for FakeStore {
        async fn load_seen(&self) -> Result<Vec<TokenId>, StoreError> {
            Ok(self.recorded.lock().unwrap().iter().map(|(t, _)| t.clone()).collect())
        }

        async fn record_seen(&self, token: &TokenId, ledger_index: LedgerIndex) -> Result<(), StoreError> {
            self.recorded.lock().unwrap().push((token.clone(), ledger_index));
            Ok(())
        }
    }

    fn candidate(currency: &str, ledger_index: LedgerIndex) -> TrustLineCandidate {
        TrustLineCandidate {
            issuer: ISSUER.to_string(),
            currency: currency.to_string(),
            ledger_index,
            account: None,
            tx_hash: None,
        }
    }

    fn classifier(market: Arc<FakeMarket>) -> TokenClassifier {
        TokenClassifier::new(ClassifierConfig::default(), market, Arc::new(NoveltySet::new()))
    }

    #[tokio::test]
    async fn test_first_sighting_is_new_and_enriched() {
        let market = Arc::new(FakeMarket::default());
        let classifier = classifier(market.clone());

        let first = classifier.classify(&candidate("ABC", 100)).await.unwrap();
        assert!(first.is_new);
        assert_eq!(first.display_name(), "ABC Token");

        let second = classifier.classify(&candidate("ABC", 101)).await.unwrap();
        assert!(!second.is_new);
        assert_eq!(second.market, None);
        assert_eq!(market.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_no_market() {
        let market = Arc::new(FakeMarket {
            fail: true,
            ..Default::default()
        });
        let classifier = classifier(market);

        let descriptor = classifier.classify(&candidate("ABC", 100)).await.unwrap();
        assert!(descriptor.is_new);
        assert_eq!(descriptor.market, None);
        assert_eq!(descriptor.display_name(), "ABC");
    }

    #[tokio::test]
    async fn test_invalid_candidate_is_error() {
        let classifier = classifier(Arc::new(FakeMarket::default()));
        let mut bad = candidate("ABC", 1);
        bad.issuer = "not-an-address".into();
        assert!(matches!(
            classifier.classify(&bad).await,
            Err(ClassifyError::InvalidToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_skips_failures_and_keeps_order() {
        let classifier = classifier(Arc::new(FakeMarket::default()));
        let mut bad = candidate("ABC", 1);
        bad.currency = "XRP".into();

        let batch = vec![candidate("AAA", 1), bad, candidate("BBB", 2), candidate("AAA", 3)];
        let descriptors = classifier.classify_batch(&batch).await;

        let summary: Vec<(String, bool)> = descriptors
            .iter()
            .map(|d| (d.token.currency.to_string(), d.is_new))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("AAA".to_string(), true),
                ("BBB".to_string(), true),
                ("AAA".to_string(), false),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_concurrency_is_bounded() {
        let market = Arc::new(FakeMarket {
            delay: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let classifier = TokenClassifier::new(
            ClassifierConfig {
                max_concurrent_lookups: 2,
            },
            market.clone(),
            Arc::new(NoveltySet::new()),
        );

        let batch: Vec<_> = ["AAA", "BBB", "CCC", "DDD", "EEE"]
            .iter()
            .map(|c| candidate(c, 5))
            .collect();
        let descriptors = classifier.classify_batch(&batch).await;

        assert_eq!(descriptors.len(), 5);
        assert_eq!(market.lookups.load(Ordering::SeqCst), 5);
        assert_eq!(market.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_runs_on_spawned_task() {
        let classifier = Arc::new(classifier(Arc::new(FakeMarket::default())));
        let batch = vec![candidate("AAA", 1), candidate("BBB", 1)];

        let task = {
            let classifier = Arc::clone(&classifier);
            tokio::spawn(async move { classifier.classify_batch(&batch).await })
        };

        let descriptors = task.await.unwrap();
        assert_eq!(descriptors.len(), 2);
        assert!(descriptors.iter().all(|d| d.is_new));
    }

    #[tokio::test]
    async fn test_new_tokens_are_persisted() {
        let store = Arc::new(FakeStore::default());
        let classifier = classifier(Arc::new(FakeMarket::default())).with_store(store.clone());

        classifier.classify(&candidate("ABC", 7)).await.unwrap();
        classifier.classify(&candidate("ABC", 8)).await.unwrap();

        let recorded = store.recorded.lock().unwrap().clone();
        assert_eq!(recorded, vec![(TokenId::parse(ISSUER, "ABC").unwrap(), 7)]);
    }
}
