//! Client-facing frames.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};

/// Key of the out-of-band control frame a client sends before talking to the agent.
pub const SETUP_KEY: &str = "setup";

/// Key under which raw client bytes travel to a remote engine.
pub const BINARY_DATA_KEY: &str = "binary_data";

// ============================================================================
// Inbound
// ============================================================================

/// A normalized client message.
///
/// `Setup` frames are consumed by the bridge and never reach an agent.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// A parsed JSON mapping.
    Json(Map<String, Value>),
    /// Raw bytes from a binary frame, unmodified.
    Binary(Bytes),
    /// The setup control frame (whole mapping, including the `setup` key).
    Setup(Map<String, Value>),
}

impl InboundMessage {
    /// Classify a decoded JSON value.
    ///
    /// Returns the value back as `Err` when it is not a mapping.
    pub fn from_json(value: Value) -> Result<Self, Value> {
        match value {
            Value::Object(map) if map.contains_key(SETUP_KEY) => Ok(Self::Setup(map)),
            Value::Object(map) => Ok(Self::Json(map)),
            other => Err(other),
        }
    }

    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }

    /// JSON form sent to a remote engine.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Json(map) | Self::Setup(map) => Value::Object(map.clone()),
            Self::Binary(bytes) => json!({ BINARY_DATA_KEY: BASE64.encode(bytes) }),
        }
    }
}

// ============================================================================
// Outbound
// ============================================================================

/// A frame sent from the bridge to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    /// `{"setupComplete": {}}`, sent once the backend can accept input.
    SetupComplete,
    /// A canonical agent response, forwarded verbatim.
    Response(Value),
    /// `{"error": "..."}`
    Error(String),
    /// `{"status": "..."}`, used for reconnect notifications.
    Status(String),
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self::Status(message.into())
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::SetupComplete => json!({ "setupComplete": {} }),
            Self::Response(value) => value.clone(),
            Self::Error(message) => json!({ "error": message }),
            Self::Status(message) => json!({ "status": message }),
        }
    }

    /// Serialized text frame payload.
    pub fn to_text(&self) -> String {
        self.to_value().to_string()
    }
}

impl Serialize for ServerFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}
