use super::{BotTransport, DeliveryError};
use crate::entities::RecipientId;
use crate::rendering::Alert;
use async_trait::async_trait;
use chainbell_sdk::client::{ClientError, TelegramClient};
use chainbell_sdk::objects::{
    InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, SendMessage, SendPhoto,
};
use std::time::Duration;

/// [`BotTransport`] over the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    client: TelegramClient,
}

impl TelegramTransport {
    pub fn new(client: TelegramClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BotTransport for TelegramTransport {
    async fn send(&self, recipient: &RecipientId, alert: &Alert) -> Result<(), DeliveryError> {
        let reply_markup = keyboard(alert);
        let result = match alert.photo.as_deref() {
            Some(photo) => {
                let message = SendPhoto {
                    chat_id: recipient.as_str(),
                    photo,
                    caption: &alert.text,
                    parse_mode: Some(ParseMode::Html),
                    reply_markup,
                };
                self.client.send_photo(&message).await
            }
            None => {
                let message = SendMessage {
                    chat_id: recipient.as_str(),
                    text: &alert.text,
                    parse_mode: Some(ParseMode::Html),
                    disable_web_page_preview: true,
                    reply_markup,
                };
                self.client.send_message(&message).await
            }
        };
        result.map_err(classify_client_error)
    }
}

fn keyboard(alert: &Alert) -> Option<InlineKeyboardMarkup> {
    if alert.buttons.is_empty() {
        return None;
    }
    Some(InlineKeyboardMarkup::single_column(alert.buttons.iter().map(
        |b| InlineKeyboardButton {
            text: b.label.clone(),
            url: b.url.clone(),
        },
    )))
}

/// Sort a Bot API failure into retryable and final.
pub fn classify_client_error(error: ClientError) -> DeliveryError {
    match error {
        ClientError::Telegram {
            status: 429,
            description,
            retry_after,
        } => DeliveryError::Transient {
            reason: format!("rate limited: {description}"),
            retry_after: retry_after.map(Duration::from_secs),
        },
        ClientError::Telegram {
            status,
            description,
            ..
        } if status >= 500 => DeliveryError::transient(format!("status {status}: {description}")),
        ClientError::Telegram {
            status,
            description,
            ..
        } => DeliveryError::Permanent(format!("status {status}: {description}")),
        ClientError::Http(e) if e.is_builder() => DeliveryError::Permanent(e.to_string()),
        ClientError::Url(e) => DeliveryError::Permanent(e.to_string()),
        ClientError::Json(e) => DeliveryError::Permanent(e.to_string()),
        other => DeliveryError::transient(other.to_string()),
    }
}
