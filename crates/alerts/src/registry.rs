//! Subscriber registry with membership gating and periodic re-verification.

use crate::channel::{MembershipError, MembershipOracle, NotificationChannel};
use crate::format::Notice;
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokenwatch_core::SubscriberId;
use tokenwatch_engine::StoreError;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Membership(#[from] MembershipError),
}

/// Result of a subscribe request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed,
    AlreadySubscribed,
    /// Membership check answered "not a member".
    NotMember,
}

/// Summary of one re-verification pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReverifyReport {
    pub checked: usize,
    pub removed: usize,
    /// Subscribers kept because the check itself failed.
    pub retained_on_error: usize,
}

/// Durable subscriber storage.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn load_subscribers(&self) -> Result<Vec<SubscriberId>, StoreError>;
    async fn add_subscriber(&self, id: SubscriberId) -> Result<(), StoreError>;
    async fn remove_subscriber(&self, id: SubscriberId) -> Result<(), StoreError>;
}

/// Process-wide subscriber set.
pub struct SubscriberRegistry {
    subscribers: DashSet<SubscriberId>,
    oracle: Arc<dyn MembershipOracle>,
    store: Option<Arc<dyn SubscriberStore>>,
}

impl SubscriberRegistry {
    pub fn new(oracle: Arc<dyn MembershipOracle>) -> Self {
        Self {
            subscribers: DashSet::new(),
            oracle,
            store: None,
        }
    }

    /// Write subscriber changes through to `store`.
    pub fn with_store(mut self, store: Arc<dyn SubscriberStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Seed the set from the store. Returns the number of subscribers loaded.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let ids = store.load_subscribers().await?;
        let count = ids.len();
        for id in ids {
            self.subscribers.insert(id);
        }
        info!(count, "Loaded subscribers");
        Ok(count)
    }

    /// Add `id` if the membership oracle confirms it.
    pub async fn subscribe(&self, id: SubscriberId) -> Result<SubscribeOutcome, RegistryError> {
        if !self.oracle.check_membership(id).await? {
            debug!(chat_id = %id, "Subscribe refused, not a member");
            return Ok(SubscribeOutcome::NotMember);
        }

        if !self.subscribers.insert(id) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        info!(chat_id = %id, total = self.subscribers.len(), "Subscriber added");
        if let Some(store) = &self.store {
            if let Err(e) = store.add_subscriber(id).await {
                warn!(chat_id = %id, error = %e, "Failed to persist subscriber");
            }
        }
        Ok(SubscribeOutcome::Subscribed)
    }

    /// Remove `id` unconditionally. Returns whether it was subscribed.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.remove(id, "unsubscribed").await
    }

    /// Remove `id`, logging `reason`.
    pub async fn remove(&self, id: SubscriberId, reason: &str) -> bool {
        if self.subscribers.remove(&id).is_none() {
            return false;
        }

        info!(chat_id = %id, reason, total = self.subscribers.len(), "Subscriber removed");
        if let Some(store) = &self.store {
            if let Err(e) = store.remove_subscriber(id).await {
                warn!(chat_id = %id, error = %e, "Failed to delete persisted subscriber");
            }
        }
        true
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Stable copy of the current set, sorted.
    pub fn snapshot(&self) -> Vec<SubscriberId> {
        let mut ids: Vec<SubscriberId> = self.subscribers.iter().map(|id| *id).collect();
        ids.sort();
        ids
    }

    /// Re-check every subscriber against the membership oracle.
    ///
    /// Definitive non-members are removed and told so (best effort); failed
    /// checks keep the subscriber.
    pub async fn reverify(&self, channel: &dyn NotificationChannel) -> ReverifyReport {
        let mut report = ReverifyReport::default();

        for id in self.snapshot() {
            report.checked += 1;
            match self.oracle.check_membership(id).await {
                Ok(true) => {}
                Ok(false) => {
                    if self.remove(id, "no longer a member").await {
                        report.removed += 1;
                        if let Err(e) = channel.deliver_notice(id, Notice::SubscriptionPaused).await {
                            debug!(chat_id = %id, error = %e, "Failed to send pause notice");
                        }
                    }
                }
                Err(e) => {
                    report.retained_on_error += 1;
                    warn!(chat_id = %id, error = %e, "Membership check failed, keeping subscriber");
                }
            }
        }

        report
    }

    /// Run [`reverify`](Self::reverify) every `interval`, starting one
    /// interval after the call.
    pub async fn run_reverify_loop(
        self: Arc<Self>,
        channel: Arc<dyn NotificationChannel>,
        interval: Duration,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.reverify(channel.as_ref()).await;
            info!(
                checked = report.checked,
                removed = report.removed,
                retained_on_error = report.retained_on_error,
                "Subscriber re-verification done"
            );
        }
    }
}
