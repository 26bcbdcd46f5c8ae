//! Sui JSON-RPC wire types.
//!
//! Only the fields chainbell consumes are modelled. Numeric fields that Sui
//! encodes as decimal strings (`eventSeq`, `timestampMs`, `checkpoint`) are
//! kept as strings here and parsed by the consumer.

use serde::{Deserialize, Serialize};

/// Identifier of a Sui event: the transaction digest plus the event's
/// position inside that transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEventId {
    pub tx_digest: String,
    pub event_seq: String,
}

/// A Move event as delivered by `suix_subscribeEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEvent {
    pub id: SuiEventId,
    pub package_id: String,
    #[serde(default)]
    pub transaction_module: String,
    #[serde(default)]
    pub sender: String,
    /// Fully qualified Move type, e.g. `0xabc::curve::Purchased`.
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub parsed_json: serde_json::Value,
    #[serde(default)]
    pub timestamp_ms: Option<String>,
    /// Checkpoint sequence number the event was included in.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

/// Summary pushed by a checkpoint subscription once a checkpoint is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointSummary {
    pub sequence_number: String,
}

/// Payload of a subscription notification.
///
/// Event notifications and checkpoint notifications share one socket, so
/// the payload is distinguished structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeNotification {
    Event(SuiEvent),
    Checkpoint(CheckpointSummary),
}

/// Outgoing JSON-RPC request frame.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a, P: Serialize> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: P,
}

impl<'a, P: Serialize> JsonRpcRequest<'a, P> {
    pub fn new(id: u64, method: &'a str, params: P) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// `params` member of a subscription notification.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: serde_json::Value,
    pub result: serde_json::Value,
}

/// Any incoming frame on the node socket.
///
/// Responses carry an `id`; notifications carry a `method` and no `id`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcIncoming {
    Response {
        id: u64,
        #[serde(default)]
        result: Option<serde_json::Value>,
        #[serde(default)]
        error: Option<JsonRpcError>,
    },
    Notification {
        method: String,
        params: NotificationParams,
    },
}

/// Build the Sui event filter for a set of package ids.
///
/// An empty package list subscribes to every event.
pub fn package_filter(packages: &[String]) -> serde_json::Value {
    if packages.is_empty() {
        return serde_json::json!({ "All": [] });
    }
    let any: Vec<serde_json::Value> = packages
        .iter()
        .map(|p| serde_json::json!({ "Package": p }))
        .collect();
    serde_json::json!({ "Any": any })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_notification_parsing() {
        let raw = r#"{
            "jsonrpc": "2.0",
            "method": "suix_subscribeEvent",
            "params": {
                "subscription": 42,
                "result": {
                    "id": { "txDigest": "9xQ7", "eventSeq": "3" },
                    "packageId": "0x7b88",
                    "transactionModule": "curve",
                    "sender": "0xbuyer",
                    "type": "0x7b88::curve::Purchased",
                    "parsedJson": { "amount": "2500000000" },
                    "timestampMs": "1718000000000",
                    "checkpoint": "1200"
                }
            }
        }"#;
        let incoming: JsonRpcIncoming = serde_json::from_str(raw).unwrap();
        let JsonRpcIncoming::Notification { method, params } = incoming else {
            panic!("expected a notification");
        };
        assert_eq!(method, "suix_subscribeEvent");
        let payload: NodeNotification = serde_json::from_value(params.result).unwrap();
        let NodeNotification::Event(event) = payload else {
            panic!("expected an event payload");
        };
        assert_eq!(event.id.event_seq, "3");
        assert_eq!(event.checkpoint.as_deref(), Some("1200"));
        assert_eq!(event.parsed_json["amount"], "2500000000");
    }

    #[test]
    fn test_checkpoint_notification_parsing() {
        let payload: NodeNotification =
            serde_json::from_str(r#"{ "sequenceNumber": "1201", "digest": "abc" }"#).unwrap();
        assert_eq!(
            payload,
            NodeNotification::Checkpoint(CheckpointSummary {
                sequence_number: "1201".to_string()
            })
        );
    }

    #[test]
    fn test_response_parsing() {
        let incoming: JsonRpcIncoming =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":7}"#).unwrap();
        assert!(matches!(incoming, JsonRpcIncoming::Response { id: 1, error: None, .. }));

        let incoming: JsonRpcIncoming = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32602,"message":"bad filter"}}"#,
        )
        .unwrap();
        let JsonRpcIncoming::Response { error: Some(err), .. } = incoming else {
            panic!("expected an error response");
        };
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn test_package_filter() {
        assert_eq!(package_filter(&[]), serde_json::json!({ "All": [] }));
        assert_eq!(
            package_filter(&["0x1".to_string(), "0x2".to_string()]),
            serde_json::json!({ "Any": [{ "Package": "0x1" }, { "Package": "0x2" }] })
        );
    }
}
