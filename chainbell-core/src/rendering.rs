//! Telegram HTML rendering of ledgered events.

use crate::entities::chain_events::{BuyFields, ChainEvent, EventPayload, OtherFields};
use crate::entities::subscriptions::SubscriptionDisplay;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::fmt::Write;

/// Most emojis printed on a buy line.
const MAX_EMOJIS: u64 = 50;

pub const DEFAULT_EXPLORER_BASE: &str = "https://suivision.xyz";

/// Where the "Buy" button of a buy alert points, followed by the token.
pub const SWAP_LINK_BASE: &str = "https://dexscreener.com/sui";

/// A rendered notification, ready for a [`BotTransport`](crate::transport::BotTransport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Telegram HTML. Sent as the caption when `photo` is set.
    pub text: String,
    pub photo: Option<String>,
    pub buttons: Vec<AlertButton>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertButton {
    pub label: String,
    pub url: String,
}

impl Alert {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            photo: None,
            buttons: Vec::new(),
        }
    }
}

/// Renders alerts with links into a block explorer.
#[derive(Debug, Clone)]
pub struct Renderer {
    explorer_base: String,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new(DEFAULT_EXPLORER_BASE)
    }
}

impl Renderer {
    pub fn new(explorer_base: impl Into<String>) -> Self {
        let explorer_base: String = explorer_base.into();
        Self {
            explorer_base: explorer_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn account_url(&self, address: &str) -> String {
        format!("{}/account/{}", self.explorer_base, address)
    }

    pub fn tx_url(&self, digest: &str) -> String {
        format!("{}/txblock/{}", self.explorer_base, digest)
    }

    /// Render `event`. `display` comes from the subscription that matched;
    /// without one, defaults are used.
    ///
    /// Buy alerts carry the subscription's photo and a "Buy" button to the
    /// token's swap page.
    pub fn render(&self, event: &ChainEvent, display: Option<&SubscriptionDisplay>) -> Alert {
        let default_display = SubscriptionDisplay::default();
        let display = display.unwrap_or(&default_display);
        match &event.payload {
            EventPayload::Buy(buy) => Alert {
                text: self.render_buy(event, buy, display),
                photo: display.media.clone(),
                buttons: vec![AlertButton {
                    label: "Buy".to_string(),
                    url: swap_link(&buy.token),
                }],
            },
            EventPayload::Other(other) => Alert::text(self.render_other(event, other)),
        }
    }

    fn render_buy(&self, event: &ChainEvent, buy: &BuyFields, display: &SubscriptionDisplay) -> String {
        let symbol = escape_html(display.symbol.as_deref().unwrap_or("Token"));
        let emoji_line = emoji_line(display.emoji.as_deref(), buy.amount, display.buy_step);

        let mut text = String::new();
        match display.telegram.as_deref() {
            Some(chat) => {
                let _ = writeln!(text, "<b><a href=\"{}\">{symbol} Buy!</a></b>", escape_html(chat));
            }
            None => {
                let _ = writeln!(text, "<b>{symbol} Buy!</b>");
            }
        }
        if !emoji_line.is_empty() {
            let _ = writeln!(text, "{}", escape_html(&emoji_line));
        }
        let _ = writeln!(text, "⬅️ Spent {} SUI", format_amount(buy.amount));
        let _ = writeln!(text, "➡️ Got {} {symbol}", format_amount(buy.token_amount));
        let _ = writeln!(text);
        let _ = writeln!(
            text,
            "👤 Buyer <a href=\"{}\">{}</a> | <a href=\"{}\">Txn</a>",
            escape_html(&self.account_url(&buy.buyer)),
            escape_html(&short_addr(&buy.buyer)),
            escape_html(&self.tx_url(&buy.tx_digest)),
        );
        let links: Vec<String> = display
            .links()
            .map(|(label, url)| format!("<a href=\"{}\">{label}</a>", escape_html(url)))
            .collect();
        if !links.is_empty() {
            let _ = writeln!(text, "{}", links.join(" | "));
        }
        if let Some(chart) = display.chart_url.as_deref() {
            let _ = writeln!(text, "📈 <a href=\"{}\">Chart</a>", escape_html(chart));
        }
        let _ = write!(text, "🧱 Checkpoint {}", event.block_height());
        text
    }

    fn render_other(&self, event: &ChainEvent, other: &OtherFields) -> String {
        let mut text = String::new();
        let _ = writeln!(text, "<b>{}</b>", escape_html(&other.event_type));
        let _ = writeln!(text, "📦 Package <code>{}</code>", escape_html(&short_addr(&other.package)));
        let _ = writeln!(
            text,
            "<a href=\"{}\">Txn</a>",
            escape_html(&self.tx_url(&other.tx_digest))
        );
        let _ = write!(text, "🧱 Checkpoint {}", event.block_height());
        text
    }
}

pub fn swap_link(token: &str) -> String {
    format!("{SWAP_LINK_BASE}/{token}")
}

/// Escape the characters Telegram's HTML parse mode treats specially.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// `0x1234...abcd`. Strings shorter than 10 characters are returned as is.
pub fn short_addr(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() < 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Two decimals, compacted with `K` from a thousand and `M` from a million.
pub fn format_amount(amount: Decimal) -> String {
    let thousand = Decimal::from(1_000);
    let million = Decimal::from(1_000_000);
    let (value, suffix) = if amount >= million {
        (amount / million, "M")
    } else if amount >= thousand {
        (amount / thousand, "K")
    } else {
        (amount, "")
    };
    format!("{:.2}{suffix}", value.round_dp(2))
}

/// `emoji` repeated once per `buy_step` of `amount`, at most [`MAX_EMOJIS`]
/// times. Empty without an emoji or a positive step.
pub fn emoji_line(emoji: Option<&str>, amount: Decimal, buy_step: Option<Decimal>) -> String {
    let (Some(emoji), Some(step)) = (emoji, buy_step) else {
        return String::new();
    };
    if emoji.is_empty() || step <= Decimal::ZERO {
        return String::new();
    }
    let count = amount
        .checked_div(step)
        .map(|n| n.floor())
        .and_then(|n| n.to_u64())
        .unwrap_or(0)
        .min(MAX_EMOJIS);
    emoji.repeat(count as usize)
}
