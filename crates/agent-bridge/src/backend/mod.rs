//! Backend provider abstraction.
//!
//! A session reaches its agent in one of two ways:
//!
//! - **Local**: an in-process agent consumes the input queue directly and
//!   yields canonical responses.
//! - **Remote**: a network session to an agent engine, driven by two
//!   forwarding tasks (queue → engine, engine → client).
//!
//! The variant is chosen once at process start and shared by every session.

mod local;
mod loopback;
mod remote;

pub use local::{LocalAgentFactory, LocalProvider, local_agent_factory};
pub use loopback::LoopbackAgent;
pub use remote::{RemoteProvider, RemoteTarget, WebSocketConnector, classify_ws_error};

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream};
use log::debug;
use serde_json::Value;

use crate::error::{BridgeError, BridgeResult};
use crate::queue::InputQueue;

/// Responses produced by a local agent.
pub type ResponseStream = Pin<Box<dyn Stream<Item = BridgeResult<Value>> + Send>>;

/// Outbound half of a remote engine session.
pub type RemoteSink = Pin<Box<dyn Sink<Value, Error = BridgeError> + Send>>;

/// Inbound half of a remote engine session.
pub type RemoteStream = Pin<Box<dyn Stream<Item = BridgeResult<Value>> + Send>>;

/// An in-process agent with streaming-call semantics.
pub trait LocalAgent: Send + Sync {
    /// Start a streaming call fed by `input`.
    ///
    /// The returned stream ends when the call is finished; it normally runs
    /// until `input` closes.
    fn bidi_stream_query(&self, input: InputQueue) -> ResponseStream;
}

/// An open session with a remote agent engine.
pub struct RemoteSession {
    pub sink: RemoteSink,
    pub stream: RemoteStream,
}

impl RemoteSession {
    pub fn new(sink: RemoteSink, stream: RemoteStream) -> Self {
        Self { sink, stream }
    }

    /// Close the outbound half; dropping the session releases the rest.
    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!("Error closing remote session: {}", e);
        }
    }
}

/// Opens sessions with a remote agent engine.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Connect and complete the engine's session handshake.
    async fn connect(&self, target: &RemoteTarget) -> BridgeResult<RemoteSession>;
}

/// How sessions reach their agent.
pub enum BackendProvider {
    Local(LocalProvider),
    Remote(RemoteProvider),
}

impl BackendProvider {
    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::Remote(_) => "remote",
        }
    }
}
