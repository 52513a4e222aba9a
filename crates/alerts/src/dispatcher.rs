//! Alert fan-out to the current subscriber set.

use crate::channel::NotificationChannel;
use crate::format::format_alert_message;
use crate::registry::SubscriberRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokenwatch_core::TokenDescriptor;
use tracing::{debug, info, warn};

/// Outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub recipients: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Subscribers dropped after a permanent delivery failure.
    pub removed: usize,
}

/// Sends alerts to every subscriber, one recipient at a time.
pub struct AlertDispatcher {
    registry: Arc<SubscriberRegistry>,
    channel: Arc<dyn NotificationChannel>,
    delivery_timeout: Duration,
}

impl AlertDispatcher {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        channel: Arc<dyn NotificationChannel>,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            channel,
            delivery_timeout,
        }
    }

    /// Deliver the alert for `descriptor` to the current subscriber snapshot.
    ///
    /// Descriptors that are not new are ignored. Per-recipient failures are
    /// counted, never returned; there is no retry within one alert.
    pub async fn dispatch(&self, descriptor: &TokenDescriptor) -> DispatchReport {
        let mut report = DispatchReport::default();
        if !descriptor.is_new {
            return report;
        }

        let message = format_alert_message(descriptor);
        let recipients = self.registry.snapshot();
        report.recipients = recipients.len();

        for id in recipients {
            let result = tokio::time::timeout(self.delivery_timeout, self.channel.deliver(id, &message)).await;

            match result {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    debug!(chat_id = %id, token = %descriptor.token, "Alert sent");
                }
                Ok(Err(e)) if e.is_permanent() => {
                    report.failed += 1;
                    warn!(chat_id = %id, error = %e, "Recipient unreachable, removing subscriber");
                    if self.registry.remove(id, "unreachable").await {
                        report.removed += 1;
                    }
                }
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(chat_id = %id, error = %e, "Failed to send alert");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(chat_id = %id, timeout = ?self.delivery_timeout, "Alert delivery timed out");
                }
            }
        }

        info!(
            token = %descriptor.token,
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "Alert dispatched"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{FakeChannel, FakeOracle};
    use pretty_assertions::assert_eq;
    use tokenwatch_core::{SubscriberId, TokenId};

    fn descriptor(is_new: bool) -> TokenDescriptor {
        TokenDescriptor {
            token: TokenId::parse("rvYAfWj5gh67oV6fW32ZzP3Aw4Eubs59B", "ABC").unwrap(),
            ledger_index: 100,
            is_new,
            market: None,
        }
    }

    async fn registry_with(ids: &[i64]) -> Arc<SubscriberRegistry> {
        let answers: Vec<(i64, Option<bool>)> = ids.iter().map(|id| (*id, Some(true))).collect();
        let registry = SubscriberRegistry::new(Arc::new(FakeOracle::with(&answers)));
        for id in ids {
            registry.subscribe(SubscriberId(*id)).await.unwrap();
        }
        Arc::new(registry)
    }

    fn delivered_to(channel: &FakeChannel) -> Vec<i64> {
        channel.delivered.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_broadcast() {
        let registry = registry_with(&[1, 2, 3]).await;
        let channel = Arc::new(FakeChannel {
            transient: [2].into_iter().collect(),
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(registry.clone(), channel.clone(), Duration::from_secs(5));

        let report = dispatcher.dispatch(&descriptor(true)).await;

        assert_eq!(
            report,
            DispatchReport {
                recipients: 3,
                delivered: 2,
                failed: 1,
                removed: 0,
            }
        );
        assert_eq!(delivered_to(&channel), vec![1, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_removes_subscriber() {
        let registry = registry_with(&[1, 2]).await;
        let channel = Arc::new(FakeChannel {
            permanent: [1].into_iter().collect(),
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(registry.clone(), channel.clone(), Duration::from_secs(5));

        let report = dispatcher.dispatch(&descriptor(true)).await;

        assert_eq!(report.removed, 1);
        assert!(!registry.contains(SubscriberId(1)));
        assert!(registry.contains(SubscriberId(2)));
    }

    #[tokio::test]
    async fn test_known_token_is_not_dispatched() {
        let registry = registry_with(&[1]).await;
        let channel = Arc::new(FakeChannel::default());
        let dispatcher = AlertDispatcher::new(registry, channel.clone(), Duration::from_secs(5));

        let report = dispatcher.dispatch(&descriptor(false)).await;

        assert_eq!(report, DispatchReport::default());
        assert!(delivered_to(&channel).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_recipient_times_out() {
        let registry = registry_with(&[1, 2]).await;
        let channel = Arc::new(FakeChannel {
            slow: [1].into_iter().collect(),
            ..Default::default()
        });
        let dispatcher = AlertDispatcher::new(registry.clone(), channel.clone(), Duration::from_secs(10));

        let report = dispatcher.dispatch(&descriptor(true)).await;

        assert_eq!(report.failed, 1);
        assert_eq!(delivered_to(&channel), vec![2]);
        assert!(registry.contains(SubscriberId(1)));
    }
}
