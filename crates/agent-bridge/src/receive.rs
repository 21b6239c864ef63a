//! Client receive loop.
//!
//! Reads client frames, classifies them, and feeds the input queue.

use agent_bridge_protocol::InboundMessage;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::queue::{InputSender, QueueError};

/// A client frame, independent of the transport that carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Text(String),
    Binary(Bytes),
    /// Ping/pong and other transport-level frames.
    Control,
    Close,
}

/// Why the receive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The client sent a close frame or the connection ended.
    ClientClosed,
    /// A text frame was not valid JSON.
    DecodeError,
    /// The backend side stopped reading.
    QueueClosed,
    /// The session was torn down.
    Cancelled,
}

/// Run until the client goes away, a frame fails to decode, or `cancel` fires.
///
/// Consumes `sender`, so the input queue closes when the loop ends.
pub async fn receive_from_client<S>(
    frames: &mut S,
    sender: InputSender,
    cancel: &CancellationToken,
) -> ReceiveOutcome
where
    S: Stream<Item = ClientFrame> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return ReceiveOutcome::Cancelled,
            frame = frames.next() => frame,
        };

        let message = match frame {
            None | Some(ClientFrame::Close) => {
                info!("Client closed connection");
                return ReceiveOutcome::ClientClosed;
            }
            Some(ClientFrame::Text(text)) => {
                let value = match serde_json::from_str(&text) {
                    Ok(value) => value,
                    Err(e) => {
                        error!("Error parsing JSON from client: {}", e);
                        return ReceiveOutcome::DecodeError;
                    }
                };
                match InboundMessage::from_json(value) {
                    Ok(InboundMessage::Setup(setup)) => {
                        info!("Received setup message (not forwarding to agent)");
                        debug!("setup payload: {}", serde_json::Value::Object(setup));
                        continue;
                    }
                    Ok(message) => message,
                    Err(other) => {
                        warn!("Received unexpected JSON structure from client: {}", other);
                        continue;
                    }
                }
            }
            Some(ClientFrame::Binary(bytes)) => InboundMessage::Binary(bytes),
            Some(ClientFrame::Control) => {
                debug!("Ignoring control frame from client");
                continue;
            }
        };

        match sender.push(message) {
            Ok(()) => {}
            Err(QueueError::Closed) => {
                debug!("Input queue closed; stopping client receive loop");
                return ReceiveOutcome::QueueClosed;
            }
            Err(QueueError::SetupFrame) => warn!("Dropped setup frame at the input queue"),
        }
    }
}
