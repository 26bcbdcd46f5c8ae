//! Telegram Bot API request and response shapes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "MarkdownV2")]
    MarkdownV2,
}

/// Body of a `sendMessage` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendMessage<'a> {
    /// Numeric chat id or `@channelusername`.
    pub chat_id: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    pub disable_web_page_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

/// Body of a `sendPhoto` call. `photo` is an HTTP URL or a `file_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendPhoto<'a> {
    pub chat_id: &'a str,
    pub photo: &'a str,
    pub caption: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<ParseMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

/// Buttons shown under a message, one `Vec` per row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub url: String,
}

impl InlineKeyboardMarkup {
    /// A keyboard with every button on its own row.
    pub fn single_column(buttons: impl IntoIterator<Item = InlineKeyboardButton>) -> Self {
        Self {
            inline_keyboard: buttons.into_iter().map(|b| vec![b]).collect(),
        }
    }
}

/// Extra information attached to some error responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseParameters {
    /// Seconds to wait before repeating a rate-limited request.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

/// Envelope returned by every Bot API method.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramResponse {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<u16>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_message_serialization() {
        let body = SendMessage {
            chat_id: "-100200300",
            text: "<b>hi</b>",
            parse_mode: Some(ParseMode::Html),
            disable_web_page_preview: true,
            reply_markup: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["parse_mode"], "HTML");
        assert_eq!(json["chat_id"], "-100200300");
        assert!(json.get("reply_markup").is_none());
    }

    #[test]
    fn test_send_photo_with_keyboard() {
        let body = SendPhoto {
            chat_id: "@alerts",
            photo: "https://img.example/moon.png",
            caption: "<b>MOON Buy!</b>",
            parse_mode: Some(ParseMode::Html),
            reply_markup: Some(InlineKeyboardMarkup::single_column([InlineKeyboardButton {
                text: "Buy".to_string(),
                url: "https://dexscreener.com/sui/0xcafe".to_string(),
            }])),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["photo"], "https://img.example/moon.png");
        assert_eq!(json["reply_markup"]["inline_keyboard"][0][0]["text"], "Buy");
        assert_eq!(
            json["reply_markup"]["inline_keyboard"][0][0]["url"],
            "https://dexscreener.com/sui/0xcafe"
        );
    }

    #[test]
    fn test_rate_limited_response() {
        let resp: TelegramResponse = serde_json::from_str(
            r#"{"ok":false,"error_code":429,"description":"Too Many Requests: retry after 7","parameters":{"retry_after":7}}"#,
        )
        .unwrap();
        assert!(!resp.ok);
        assert_eq!(resp.parameters.and_then(|p| p.retry_after), Some(7));
    }
}
