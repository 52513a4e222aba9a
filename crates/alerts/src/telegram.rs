//! Telegram bot: command handling, alert delivery and channel membership.

use crate::channel::{DeliveryError, MembershipError, MembershipOracle, NotificationChannel};
use crate::format::Notice;
use crate::registry::{SubscribeOutcome, SubscriberRegistry};
use async_trait::async_trait;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{
    ChatMemberStatus, InlineKeyboardButton, InlineKeyboardMarkup, LinkPreviewOptions, ParseMode,
    Recipient, UserId,
};
use teloxide::utils::command::BotCommands;
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tokenwatch_core::SubscriberId;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram API error: {0}")]
    Api(#[from] RequestError),
    #[error("Invalid channel URL: {0}")]
    ChannelUrl(#[from] url::ParseError),
}

/// Bot commands.
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Subscribe to new token alerts")]
    Start,
    #[command(description = "Unsubscribe from alerts")]
    Stop,
    #[command(description = "Show your subscription status")]
    Status,
    #[command(description = "Show help")]
    Help,
}

/// Parse the required channel: numeric chat id or `@username`.
pub fn parse_channel(raw: &str) -> Recipient {
    let raw = raw.trim();
    match raw.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) if raw.starts_with('@') => Recipient::ChannelUsername(raw.to_string()),
        Err(_) => Recipient::ChannelUsername(format!("@{}", raw)),
    }
}

/// Statuses that count as membership in the required channel.
pub fn status_grants_access(status: ChatMemberStatus) -> bool {
    matches!(
        status,
        ChatMemberStatus::Owner | ChatMemberStatus::Administrator | ChatMemberStatus::Member
    )
}

/// Map a send failure to a delivery error.
pub fn classify_send_error(error: &RequestError) -> DeliveryError {
    match error {
        RequestError::Api(
            ApiError::BotBlocked
            | ApiError::BotKicked
            | ApiError::ChatNotFound
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation,
        ) => DeliveryError::Permanent(error.to_string()),
        _ => DeliveryError::Transient(error.to_string()),
    }
}

/// Alerts carry several explorer links; none of them gets a preview card.
pub fn alert_link_preview() -> LinkPreviewOptions {
    LinkPreviewOptions {
        is_disabled: true,
        url: None,
        prefer_small_media: false,
        prefer_large_media: false,
        show_above_text: false,
    }
}

/// Telegram bot wrapper.
pub struct TelegramBot {
    bot: Bot,
    channel: Recipient,
    join_url: url::Url,
}

impl TelegramBot {
    /// Create a bot gated on membership in `channel_id`.
    pub fn new(token: &str, channel_id: &str, channel_url: &str) -> Result<Self, TelegramError> {
        Ok(Self {
            bot: Bot::new(token),
            channel: parse_channel(channel_id),
            join_url: url::Url::parse(channel_url)?,
        })
    }

    /// Get the underlying bot for sending messages.
    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    fn join_keyboard(&self) -> InlineKeyboardMarkup {
        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
            "Join Our Channel",
            self.join_url.clone(),
        )]])
    }

    async fn send_notice(&self, chat_id: ChatId, notice: Notice) -> Result<(), RequestError> {
        let request = self
            .bot
            .send_message(chat_id, notice.text())
            .parse_mode(ParseMode::Html);

        if notice.wants_join_button() {
            request.reply_markup(self.join_keyboard()).await?;
        } else {
            request.await?;
        }
        Ok(())
    }

    /// Run the bot command handler until the task is cancelled.
    pub async fn run(self: Arc<Self>, registry: Arc<SubscriberRegistry>) {
        let bot = self.bot.clone();
        let handler = Update::filter_message().filter_command::<Command>().endpoint(
            move |bot: Bot, msg: Message, cmd: Command| {
                let this = Arc::clone(&self);
                let registry = Arc::clone(&registry);
                async move { this.handle_command(bot, msg, cmd, &registry).await }
            },
        );

        info!("Telegram command handler started");
        Dispatcher::builder(bot, handler).build().dispatch().await;
    }

    async fn handle_command(
        &self,
        bot: Bot,
        msg: Message,
        cmd: Command,
        registry: &SubscriberRegistry,
    ) -> Result<(), TelegramError> {
        // Subscriptions are per private chat; chat id equals user id there.
        if !msg.chat.is_private() {
            return Ok(());
        }
        let id = SubscriberId(msg.chat.id.0);

        match cmd {
            Command::Start => {
                let notice = match registry.subscribe(id).await {
                    Ok(SubscribeOutcome::Subscribed) => Notice::Subscribed,
                    Ok(SubscribeOutcome::AlreadySubscribed) => Notice::AlreadySubscribed,
                    Ok(SubscribeOutcome::NotMember) => Notice::JoinRequired,
                    Err(e) => {
                        warn!(chat_id = %id, error = %e, "Subscribe failed");
                        Notice::TryAgainLater
                    }
                };
                self.send_notice(msg.chat.id, notice).await?;
            }

            Command::Stop => {
                let notice = if registry.unsubscribe(id).await {
                    Notice::Unsubscribed
                } else {
                    Notice::NotSubscribed
                };
                self.send_notice(msg.chat.id, notice).await?;
            }

            Command::Status => {
                let text = if registry.contains(id) {
                    "✅ You're subscribed to new token alerts."
                } else {
                    "You're not subscribed. Send /start to subscribe."
                };
                bot.send_message(msg.chat.id, text).await?;
            }

            Command::Help => {
                bot.send_message(msg.chat.id, Command::descriptions().to_string())
                    .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationChannel for TelegramBot {
    async fn deliver(&self, subscriber: SubscriberId, message: &str) -> Result<(), DeliveryError> {
        self.bot
            .send_message(ChatId(subscriber.get()), message)
            .parse_mode(ParseMode::Html)
            .link_preview_options(alert_link_preview())
            .await
            .map(|_| ())
            .map_err(|e| classify_send_error(&e))
    }

    async fn deliver_notice(&self, subscriber: SubscriberId, notice: Notice) -> Result<(), DeliveryError> {
        self.send_notice(ChatId(subscriber.get()), notice)
            .await
            .map_err(|e| classify_send_error(&e))
    }
}

#[async_trait]
impl MembershipOracle for TelegramBot {
    async fn check_membership(&self, subscriber: SubscriberId) -> Result<bool, MembershipError> {
        // Only private chats (positive ids) can be channel members.
        let user_id = match u64::try_from(subscriber.get()) {
            Ok(id) => UserId(id),
            Err(_) => return Ok(false),
        };

        match self.bot.get_chat_member(self.channel.clone(), user_id).await {
            Ok(member) => {
                let status = member.kind.status();
                debug!(chat_id = %subscriber, ?status, "Membership checked");
                Ok(status_grants_access(status))
            }
            Err(RequestError::Api(ApiError::UserNotFound)) => Ok(false),
            Err(RequestError::RetryAfter(_)) => Err(MembershipError::RateLimited),
            Err(e) => Err(MembershipError::Transport(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_channel() {
        assert_eq!(parse_channel("-1001234567890"), Recipient::Id(ChatId(-1001234567890)));
        assert_eq!(
            parse_channel("@NorthernLabs"),
            Recipient::ChannelUsername("@NorthernLabs".to_string())
        );
        assert_eq!(
            parse_channel("NorthernLabs"),
            Recipient::ChannelUsername("@NorthernLabs".to_string())
        );
    }

    #[test]
    fn test_member_statuses() {
        assert!(status_grants_access(ChatMemberStatus::Owner));
        assert!(status_grants_access(ChatMemberStatus::Administrator));
        assert!(status_grants_access(ChatMemberStatus::Member));
        assert!(!status_grants_access(ChatMemberStatus::Restricted));
        assert!(!status_grants_access(ChatMemberStatus::Left));
        assert!(!status_grants_access(ChatMemberStatus::Banned));
    }

    #[test]
    fn test_classify_send_error() {
        assert!(classify_send_error(&RequestError::Api(ApiError::BotBlocked)).is_permanent());
        assert!(classify_send_error(&RequestError::Api(ApiError::ChatNotFound)).is_permanent());
        assert!(!classify_send_error(&RequestError::Api(ApiError::MessageIsTooLong)).is_permanent());
    }

    #[test]
    fn test_alert_link_preview_disabled() {
        let options = alert_link_preview();
        assert!(options.is_disabled);
        assert_eq!(options.url, None);
    }

    #[test]
    fn test_bot_rejects_bad_channel_url() {
        assert!(TelegramBot::new("123:abc", "@chan", "not a url").is_err());
        assert!(TelegramBot::new("123:abc", "@chan", "https://t.me/NorthernLabs").is_ok());
    }

    #[test]
    fn test_help_lists_commands() {
        let help = Command::descriptions().to_string();
        assert!(help.contains("/start"));
        assert!(help.contains("/stop"));
    }
}
