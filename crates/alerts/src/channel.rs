//! Outbound collaborators: the membership oracle and the notification channel.

use crate::format::Notice;
use async_trait::async_trait;
use thiserror::Error;
use tokenwatch_core::SubscriberId;

/// Membership check could not be answered. Never means "not a member".
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Membership check failed: {0}")]
    Transport(String),

    #[error("Membership check rate limited")]
    RateLimited,
}

/// Answers whether a subscriber belongs to the required group.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    /// `Ok(false)` is a definitive non-member; `Err` is inconclusive.
    async fn check_membership(&self, subscriber: SubscriberId) -> Result<bool, MembershipError>;
}

/// Delivery failure for one recipient.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Recipient unreachable for good (blocked the bot, deleted chat).
    #[error("Recipient unreachable: {0}")]
    Permanent(String),

    #[error("Delivery failed: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Permanent(_))
    }
}

/// Delivers messages to subscribers.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Deliver a pre-rendered HTML message.
    async fn deliver(&self, subscriber: SubscriberId, message: &str) -> Result<(), DeliveryError>;

    /// Deliver one of the fixed notices. Channels may attach extras such as
    /// a join button.
    async fn deliver_notice(&self, subscriber: SubscriberId, notice: Notice) -> Result<(), DeliveryError> {
        self.deliver(subscriber, notice.text()).await
    }
}
