//! Subscriber management and alert delivery.
//!
//! This crate provides:
//! - Subscriber registry gated on channel membership, with periodic re-verification
//! - Alert dispatcher with per-recipient failure isolation
//! - Telegram bot integration (commands, delivery, membership checks)
//! - SQLite persistence for subscribers and seen tokens

pub mod channel;
pub mod db;
pub mod dispatcher;
pub mod format;
pub mod registry;
pub mod telegram;

pub use channel::{DeliveryError, MembershipError, MembershipOracle, NotificationChannel};
pub use db::{Database, DbError};
pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use format::{format_alert_message, Notice};
pub use registry::{
    RegistryError, ReverifyReport, SubscribeOutcome, SubscriberRegistry, SubscriberStore,
};
pub use telegram::{TelegramBot, TelegramError};
