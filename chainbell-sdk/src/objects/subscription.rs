//! Admin API objects for managing subscriptions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of chain event a subscription can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Buy,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilterBody {
    /// Only events emitted by this Move package.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EventKind>,
    /// Only buys of this token (coin type or object id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Minimum buy size, in SUI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionDisplayBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
    /// SUI per emoji in the buy line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buy_step: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Project chat. The alert title links here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_url: Option<String>,
    /// Photo sent with buy alerts: an HTTP URL or a Telegram `file_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
}

/// `POST /api/v1/subscriptions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub recipient_id: String,
    #[serde(default)]
    pub filter: SubscriptionFilterBody,
    #[serde(default)]
    pub display: SubscriptionDisplayBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub recipient_id: String,
    pub filter: SubscriptionFilterBody,
    pub display: SubscriptionDisplayBody,
    /// Unix timestamp, seconds.
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_create_request_defaults() {
        let req: CreateSubscriptionRequest =
            serde_json::from_str(r#"{"recipient_id":"-1001"}"#).unwrap();
        assert_eq!(req.filter, SubscriptionFilterBody::default());
        assert_eq!(req.display.emoji, None);
    }

    #[test]
    fn test_min_amount_as_string() {
        let req: CreateSubscriptionRequest = serde_json::from_str(
            r#"{"recipient_id":"@alerts","filter":{"kind":"buy","min_amount":"12.5"}}"#,
        )
        .unwrap();
        assert_eq!(req.filter.kind, Some(EventKind::Buy));
        assert_eq!(req.filter.min_amount, Some(Decimal::from_str("12.5").unwrap()));
    }

    #[test]
    fn test_display_links() {
        let req: CreateSubscriptionRequest = serde_json::from_str(
            r#"{"recipient_id":"@alerts","display":{"telegram":"https://t.me/moon","media":"AgACAgQ"}}"#,
        )
        .unwrap();
        assert_eq!(req.display.telegram.as_deref(), Some("https://t.me/moon"));
        assert_eq!(req.display.media.as_deref(), Some("AgACAgQ"));
        assert_eq!(req.display.website, None);

        let json = serde_json::to_value(&req.display).unwrap();
        assert!(json.get("website").is_none());
    }
}
