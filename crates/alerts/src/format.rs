//! Alert and notice text (Telegram HTML).

use teloxide::utils::html::escape;
use tokenwatch_core::TokenDescriptor;

/// Fixed messages sent in reply to commands or membership changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Not a member of the required channel; subscribe refused.
    JoinRequired,
    Subscribed,
    AlreadySubscribed,
    Unsubscribed,
    NotSubscribed,
    /// Removed during re-verification.
    SubscriptionPaused,
    /// Membership could not be checked right now.
    TryAgainLater,
}

impl Notice {
    pub fn text(self) -> &'static str {
        match self {
            Notice::JoinRequired => {
                "👋 <b>Welcome to the XRPL Token Alert Bot!</b>\n\n\
                 This bot watches the XRP Ledger for new tokens and their first trust lines.\n\n\
                 To use it:\n\
                 1️⃣ Join our channel using the button below\n\
                 2️⃣ Come back and send /start to subscribe"
            }
            Notice::Subscribed => {
                "🎉 <b>Subscribed to XRPL Token Alerts!</b>\n\n\
                 You'll get an alert when a new token shows up on the XRPL.\n\n\
                 ⚠️ Alerts are automated. Always DYOR before interacting with new tokens.\n\n\
                 Use /stop to unsubscribe at any time."
            }
            Notice::AlreadySubscribed => "✅ You're already subscribed. Use /stop to unsubscribe.",
            Notice::Unsubscribed => {
                "✅ You've unsubscribed from token alerts.\n\nSend /start to subscribe again."
            }
            Notice::NotSubscribed => "You're not subscribed. Send /start to subscribe.",
            Notice::SubscriptionPaused => {
                "⚠️ <b>Your subscription has been paused</b>\n\n\
                 You need to be a member of our channel to receive alerts.\n\n\
                 Join the channel and send /start to reactivate your subscription."
            }
            Notice::TryAgainLater => "❌ Couldn't verify your membership right now. Please try again later.",
        }
    }

    /// Whether the notice should carry the join-channel button.
    pub fn wants_join_button(self) -> bool {
        matches!(self, Notice::JoinRequired | Notice::SubscriptionPaused)
    }
}

/// Format a number with thousands separators and at most `decimals` places.
fn format_amount(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, f.trim_end_matches('0')),
        None => (formatted.as_str(), ""),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if value < 0.0 { "-" } else { "" };
    if frac_part.is_empty() {
        format!("{}{}", sign, grouped)
    } else {
        format!("{}{}.{}", sign, grouped, frac_part)
    }
}

/// Format price with precision based on magnitude.
fn format_price(price: f64) -> String {
    let abs_price = price.abs();
    if abs_price >= 1.0 {
        format!("${}", format_amount(price, 4))
    } else if abs_price >= 0.0001 {
        format!("${}", format_amount(price, 8))
    } else {
        format!("${:.10}", price)
    }
}

/// Render the alert for a newly observed token.
pub fn format_alert_message(descriptor: &TokenDescriptor) -> String {
    let issuer = descriptor.token.issuer.as_str();
    let market = descriptor.market.as_ref();

    let mut msg = String::from("🆕 <b>New Token Detected!</b>\n\n");

    if let Some(name) = market.and_then(|m| m.name.as_deref()) {
        msg.push_str(&format!("📝 <b>Name:</b> {}\n", escape(name)));
    }
    if let Some(symbol) = market.and_then(|m| m.symbol.as_deref()) {
        msg.push_str(&format!("🏷 <b>Symbol:</b> {}\n", escape(symbol)));
    }

    let currency = descriptor.token.currency.display_name();
    if descriptor.token.currency.is_hex() {
        msg.push_str(&format!(
            "🔹 <b>Currency:</b> {} (<code>{}</code>)\n",
            escape(&currency),
            descriptor.token.currency
        ));
    } else {
        msg.push_str(&format!("🔹 <b>Currency:</b> {}\n", escape(&currency)));
    }
    msg.push_str(&format!("👤 <b>Issuer:</b> <code>{}</code>\n", issuer));
    msg.push_str(&format!("📒 <b>Ledger:</b> {}\n\n", descriptor.ledger_index));

    let supply = market
        .and_then(|m| m.supply)
        .map(|s| format_amount(s, 2))
        .unwrap_or_else(|| "Unknown".to_string());
    let liquidity = market
        .and_then(|m| m.liquidity_usd)
        .map(|l| format!("${}", format_amount(l, 2)))
        .unwrap_or_else(|| "Not yet available".to_string());

    msg.push_str(&format!("💰 <b>Supply:</b> {}\n", supply));
    msg.push_str(&format!("💧 <b>Liquidity:</b> {}\n", liquidity));
    if let Some(price) = market.and_then(|m| m.price_usd) {
        msg.push_str(&format!("💵 <b>Price:</b> {}\n", format_price(price)));
    }

    msg.push_str("\n⚠️ <i>DYOR - this is an automated alert</i>\n\n🔗 <b>View on:</b>\n");
    msg.push_str(&format!(
        "• <a href=\"https://livenet.xrpl.org/accounts/{0}\">XRPL Explorer</a>\n\
         • <a href=\"https://xrpscan.com/account/{0}\">XRPScan</a>\n",
        issuer
    ));
    if let Some(url) = market.and_then(|m| m.pair_url.as_deref()) {
        msg.push_str(&format!("• <a href=\"{}\">DEXScreener</a>\n", escape(url)));
    }

    let now = chrono::Utc::now();
    msg.push_str(&format!("\n⏰ {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    msg
}
