//! In-process development agent.

use agent_bridge_protocol::InboundMessage;
use futures::StreamExt;
use serde_json::{Value, json};

use super::{LocalAgent, ResponseStream};
use crate::error::BridgeError;
use crate::queue::InputQueue;

/// Answers every message in order; useful for exercising clients without a
/// model behind the bridge.
///
/// - `{"text": "hello"}` → `{"text": "hello ack"}`
/// - other mappings are echoed back
/// - binary input → `{"binaryAck": {"bytes": <len>}}`
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackAgent;

impl LoopbackAgent {
    fn reply(message: InboundMessage) -> Option<Value> {
        match message {
            InboundMessage::Json(map) => match map.get("text").and_then(Value::as_str) {
                Some(text) => Some(json!({ "text": format!("{text} ack") })),
                None => Some(Value::Object(map)),
            },
            InboundMessage::Binary(bytes) => Some(json!({ "binaryAck": { "bytes": bytes.len() } })),
            InboundMessage::Setup(_) => None,
        }
    }
}

impl LocalAgent for LoopbackAgent {
    fn bidi_stream_query(&self, input: InputQueue) -> ResponseStream {
        Box::pin(input.filter_map(|message| async move {
            Self::reply(message).map(Ok::<_, BridgeError>)
        }))
    }
}
