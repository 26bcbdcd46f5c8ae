//! JSON-RPC-over-WebSocket subscription to a Sui full node.
//!
//! [`NodeStreamClient::subscribe`] opens one socket, sends the event
//! subscription (and, when configured, a checkpoint subscription) and hands
//! back a [`NodeStream`] that yields parsed notifications one at a time.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

use super::ClientError;
use crate::objects::sui::{JsonRpcIncoming, JsonRpcRequest, NodeNotification, package_filter};

const EVENT_SUBSCRIPTION_ID: u64 = 1;
const CHECKPOINT_SUBSCRIPTION_ID: u64 = 2;

/// Connection settings for a node event subscription.
#[derive(Debug, Clone)]
pub struct NodeStreamClient {
    ws_url: String,
    event_method: String,
    checkpoint_method: Option<String>,
    packages: Vec<String>,
}

impl NodeStreamClient {
    /// Create a new `NodeStreamClient`.
    ///
    /// * `ws_url` – `wss://` endpoint of the node.
    /// * `event_method` – subscription method, usually `suix_subscribeEvent`.
    /// * `packages` – Move packages to watch; empty means everything.
    pub fn new(
        ws_url: impl Into<String>,
        event_method: impl Into<String>,
        packages: Vec<String>,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            event_method: event_method.into(),
            checkpoint_method: None,
            packages,
        }
    }

    /// Also subscribe to finalized checkpoints using `method`.
    pub fn with_checkpoint_method(mut self, method: impl Into<String>) -> Self {
        self.checkpoint_method = Some(method.into());
        self
    }

    /// Open the socket and subscribe starting at `from_checkpoint`.
    pub async fn subscribe(&self, from_checkpoint: u64) -> Result<NodeStream, ClientError> {
        let (mut socket, _) = connect_async(self.ws_url.as_str()).await?;

        let from = serde_json::json!({ "fromCheckpoint": from_checkpoint.to_string() });
        let request = JsonRpcRequest::new(
            EVENT_SUBSCRIPTION_ID,
            &self.event_method,
            (package_filter(&self.packages), &from),
        );
        socket
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;

        if let Some(method) = &self.checkpoint_method {
            let request = JsonRpcRequest::new(CHECKPOINT_SUBSCRIPTION_ID, method, (&from,));
            socket
                .send(Message::Text(serde_json::to_string(&request)?))
                .await?;
        }

        debug!(
            url = %self.ws_url,
            method = %self.event_method,
            from_checkpoint,
            "Node subscription requested"
        );

        Ok(NodeStream { socket })
    }
}

/// An open node subscription.
pub struct NodeStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl NodeStream {
    /// Wait for the next notification.
    ///
    /// Returns `None` once the node closes the connection. Subscription
    /// acknowledgements and unparseable notifications are skipped.
    pub async fn next_notification(&mut self) -> Option<Result<NodeNotification, ClientError>> {
        loop {
            let frame = match self.socket.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Ping(_) => {
                    // tungstenite queues the pong; flushing sends it.
                    if let Err(e) = self.socket.flush().await {
                        return Some(Err(e.into()));
                    }
                    continue;
                }
                Message::Close(_) => return None,
                _ => continue,
            };

            let incoming: JsonRpcIncoming = match serde_json::from_str(&text) {
                Ok(incoming) => incoming,
                Err(e) => return Some(Err(e.into())),
            };

            match incoming {
                JsonRpcIncoming::Response {
                    error: Some(error), ..
                } => {
                    return Some(Err(ClientError::Rpc {
                        code: error.code,
                        message: error.message,
                    }));
                }
                JsonRpcIncoming::Response { id, result, .. } => {
                    debug!(request_id = id, subscription = ?result, "Subscription acknowledged");
                }
                JsonRpcIncoming::Notification { method, params } => {
                    match serde_json::from_value::<NodeNotification>(params.result) {
                        Ok(notification) => return Some(Ok(notification)),
                        Err(e) => {
                            warn!(%method, error = %e, "Skipping unrecognized notification");
                        }
                    }
                }
            }
        }
    }
}
