//! Clients for the external services chainbell talks to.
//!
//! Gated behind the `client` cargo feature.

mod node_stream;
mod telegram;

pub use node_stream::{NodeStream, NodeStreamClient};
pub use telegram::{DEFAULT_API_BASE, TelegramClient};

/// Errors produced by the SDK clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, timeout, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket failure on the node stream.
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The node answered a JSON-RPC request with an error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The Bot API rejected a call.
    #[error("telegram api error: status {status}: {description}")]
    Telegram {
        status: u16,
        description: String,
        retry_after: Option<u64>,
    },

    /// A frame or response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(value))
    }
}
