//! Scan-to-alert pipeline: classify candidates, then dispatch new tokens.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokenwatch_alerts::AlertDispatcher;
use tokenwatch_core::{LedgerRange, TrustLineCandidate};
use tokenwatch_engine::TokenClassifier;
use tokenwatch_ledger::CandidateHandler;
use tracing::debug;

/// Running totals for the final summary.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub classified: AtomicU64,
    pub new_tokens: AtomicU64,
    pub alerts_delivered: AtomicU64,
}

pub struct AlertPipeline {
    classifier: TokenClassifier,
    dispatcher: AlertDispatcher,
    stats: PipelineStats,
}

impl AlertPipeline {
    pub fn new(classifier: TokenClassifier, dispatcher: AlertDispatcher) -> Self {
        Self {
            classifier,
            dispatcher,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }
}

#[async_trait]
impl CandidateHandler for AlertPipeline {
    async fn handle_candidates(&self, range: LedgerRange, candidates: Vec<TrustLineCandidate>) {
        let descriptors = self.classifier.classify_batch(&candidates).await;
        self.stats
            .classified
            .fetch_add(descriptors.len() as u64, Ordering::Relaxed);

        // One alert at a time; each finishes before the next starts.
        for descriptor in descriptors.iter().filter(|d| d.is_new) {
            self.stats.new_tokens.fetch_add(1, Ordering::Relaxed);
            let report = self.dispatcher.dispatch(descriptor).await;
            self.stats
                .alerts_delivered
                .fetch_add(report.delivered as u64, Ordering::Relaxed);
        }

        debug!(
            %range,
            candidates = candidates.len(),
            classified = descriptors.len(),
            "Candidates handled"
        );
    }
}
