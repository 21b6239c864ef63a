use std::io::ErrorKind;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use log::{debug, info};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use super::{RemoteConnector, RemoteSession};
use crate::error::{BridgeError, BridgeResult};

/// Where and how to open a remote engine session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Engine identifier, either a bare id or a full resource name.
    pub engine_id: String,
    pub project_id: String,
    pub location: String,
    /// WebSocket endpoint of the engine service.
    pub endpoint: String,
    /// Engine method to open with streaming-call semantics.
    pub call_type: String,
}

impl RemoteTarget {
    /// Fully qualified engine resource name.
    pub fn resource_name(&self) -> String {
        if self.engine_id.starts_with("projects/") {
            self.engine_id.clone()
        } else {
            format!(
                "projects/{}/locations/{}/reasoningEngines/{}",
                self.project_id, self.location, self.engine_id
            )
        }
    }
}

/// Remote backend: a connector plus the target every session opens.
#[derive(Clone)]
pub struct RemoteProvider {
    connector: Arc<dyn RemoteConnector>,
    target: RemoteTarget,
}

impl RemoteProvider {
    pub fn new(connector: Arc<dyn RemoteConnector>, target: RemoteTarget) -> Self {
        Self { connector, target }
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub async fn connect(&self) -> BridgeResult<RemoteSession> {
        self.connector.connect(&self.target).await
    }
}

// ============================================================================
// WebSocket transport
// ============================================================================

/// Remote engine sessions over WebSocket.
///
/// After the upgrade the connector sends
/// `{"setup": {"name": <resource>, "class_method": <call type>}}`; the session
/// is considered established once that frame is written.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    access_token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(access_token: Option<String>) -> Self {
        Self { access_token }
    }
}

#[async_trait]
impl RemoteConnector for WebSocketConnector {
    async fn connect(&self, target: &RemoteTarget) -> BridgeResult<RemoteSession> {
        let mut request = target
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::Config(format!("invalid engine endpoint: {e}")))?;
        if let Some(token) = &self.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| BridgeError::Config(format!("invalid access token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        debug!("Opening engine socket {}", target.endpoint);
        let (socket, _response) = connect_async(request).await.map_err(classify_ws_error)?;
        let (mut sink, stream) = socket.split();

        let setup = json!({
            "setup": {
                "name": target.resource_name(),
                "class_method": target.call_type,
            }
        });
        sink.send(Message::Text(setup.to_string().into()))
            .await
            .map_err(classify_ws_error)?;
        info!("Opened engine session for {}", target.resource_name());

        let sink = sink
            .sink_map_err(classify_ws_error)
            .with(|value: Value| {
                future::ready(Ok::<_, BridgeError>(Message::Text(value.to_string().into())))
            });
        let stream = stream.filter_map(|frame| future::ready(decode_engine_frame(frame)));

        Ok(RemoteSession::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// Map a transport failure onto the bridge taxonomy.
///
/// Resets and dropped connections count as abnormal closure; everything else
/// is a plain transport error.
pub fn classify_ws_error(err: WsError) -> BridgeError {
    match &err {
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
            BridgeError::AbnormalClosure(err.to_string())
        }
        WsError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            ) =>
        {
            BridgeError::AbnormalClosure(err.to_string())
        }
        _ => BridgeError::Transport(err.to_string()),
    }
}

fn close_error(frame: Option<&CloseFrame>) -> Option<BridgeError> {
    let frame = frame?;
    match frame.code {
        CloseCode::Normal | CloseCode::Away => None,
        code => Some(BridgeError::AbnormalClosure(format!(
            "engine closed with code {}: {}",
            u16::from(code),
            frame.reason.as_str()
        ))),
    }
}

/// Turn one engine frame into a response, skipping transport-level frames.
fn decode_engine_frame(frame: Result<Message, WsError>) -> Option<BridgeResult<Value>> {
    match frame {
        Ok(Message::Text(text)) => Some(serde_json::from_str(text.as_str()).map_err(Into::into)),
        Ok(Message::Binary(data)) => Some(serde_json::from_slice(&data).map_err(Into::into)),
        Ok(Message::Close(frame)) => {
            debug!("Engine sent close frame: {:?}", frame);
            close_error(frame.as_ref()).map(Err)
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
        Err(e) => Some(Err(classify_ws_error(e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn target(engine_id: &str) -> RemoteTarget {
        RemoteTarget {
            engine_id: engine_id.to_string(),
            project_id: "acme".to_string(),
            location: "europe-west4".to_string(),
            endpoint: "wss://example.invalid/ws".to_string(),
            call_type: "bidi_stream_query".to_string(),
        }
    }

    #[test]
    fn test_resource_name() {
        assert_eq!(
            target("42").resource_name(),
            "projects/acme/locations/europe-west4/reasoningEngines/42"
        );
        let full = "projects/p/locations/us-central1/reasoningEngines/7";
        assert_eq!(target(full).resource_name(), full);
    }

    #[test]
    fn test_reset_is_abnormal_closure() {
        let reset = WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake);
        assert!(classify_ws_error(reset).is_retryable());

        let io_reset = WsError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(classify_ws_error(io_reset).is_retryable());

        let refused = WsError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(!classify_ws_error(refused).is_retryable());
        assert!(!classify_ws_error(WsError::ConnectionClosed).is_retryable());
    }

    #[test]
    fn test_close_codes() {
        let normal = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        assert!(decode_engine_frame(Ok(Message::Close(Some(normal)))).is_none());
        assert!(decode_engine_frame(Ok(Message::Close(None))).is_none());

        let internal = CloseFrame {
            code: CloseCode::Error,
            reason: "internal".into(),
        };
        let decoded = decode_engine_frame(Ok(Message::Close(Some(internal))));
        assert!(matches!(decoded, Some(Err(BridgeError::AbnormalClosure(_)))));
    }

    #[test]
    fn test_decode_json_frames() {
        let text = Message::Text(r#"{"bidiStreamOutput":{"text":"hi"}}"#.into());
        let decoded = decode_engine_frame(Ok(text)).unwrap().unwrap();
        assert_eq!(decoded["bidiStreamOutput"]["text"], "hi");

        let binary = Message::Binary(br#"{"text":"bin"}"#.to_vec().into());
        let decoded = decode_engine_frame(Ok(binary)).unwrap().unwrap();
        assert_eq!(decoded["text"], "bin");

        let garbage = Message::Text("nope".into());
        assert!(matches!(
            decode_engine_frame(Ok(garbage)),
            Some(Err(BridgeError::Json(_)))
        ));
        assert!(decode_engine_frame(Ok(Message::Ping(Vec::new().into()))).is_none());
    }
}
