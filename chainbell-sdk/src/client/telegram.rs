//! Telegram Bot API client.

use reqwest::Client;
use serde::Serialize;
use url::Url;

use super::ClientError;
use crate::objects::telegram::{SendMessage, SendPhoto, TelegramResponse};

/// Default public Bot API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Typed HTTP client for the subset of the Bot API chainbell uses.
///
/// The bot token is part of every request path, so transport errors are
/// stripped of their URL before being returned.
#[derive(Clone)]
pub struct TelegramClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Create a new `TelegramClient`.
    pub fn new(base_url: Url, token: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /bot{token}/sendMessage`
    pub async fn send_message(&self, message: &SendMessage<'_>) -> Result<(), ClientError> {
        self.call("sendMessage", message).await
    }

    /// `POST /bot{token}/sendPhoto`
    pub async fn send_photo(&self, photo: &SendPhoto<'_>) -> Result<(), ClientError> {
        self.call("sendPhoto", photo).await
    }

    async fn call<B: Serialize + ?Sized>(&self, method: &str, body: &B) -> Result<(), ClientError> {
        let url = self
            .base_url
            .join(&format!("/bot{}/{method}", self.token))?;

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url())?;

        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| e.without_url())?;
        let body: Option<TelegramResponse> = serde_json::from_slice(&bytes).ok();

        match body {
            Some(body) if status.is_success() && body.ok => Ok(()),
            Some(body) => Err(ClientError::Telegram {
                status: body.error_code.unwrap_or(status.as_u16()),
                description: body.description.unwrap_or_default(),
                retry_after: body.parameters.and_then(|p| p.retry_after),
            }),
            None => Err(ClientError::Telegram {
                status: status.as_u16(),
                description: String::from_utf8_lossy(&bytes).into_owned(),
                retry_after: None,
            }),
        }
    }
}
