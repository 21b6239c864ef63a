//! Test utilities and common setup.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_bridge::BridgeResult;
use agent_bridge::api::{AppState, create_router};
use agent_bridge::backend::{
    BackendProvider, LocalAgent, LocalProvider, LoopbackAgent, RemoteConnector, RemoteProvider,
    RemoteSession, RemoteTarget, ResponseStream,
};
use agent_bridge::error::BridgeError;
use agent_bridge::receive::ClientFrame;
use agent_bridge::queue::InputQueue;
use agent_bridge::session::{ClientOutbox, Session, SessionSettings};
use agent_bridge::supervisor::RetryPolicy;
use agent_bridge_protocol::ServerFrame;
use async_trait::async_trait;
use axum::Router;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt, stream};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Settings and providers
// ============================================================================

/// Session settings with zero backoff so retries run instantly.
pub fn fast_settings(max_attempts: u32) -> SessionSettings {
    SessionSettings {
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_ratio: 0.0,
        },
        ..SessionSettings::default()
    }
}

pub fn loopback_provider() -> BackendProvider {
    BackendProvider::Local(LocalProvider::with_agent(
        Arc::new(LoopbackAgent),
        Duration::ZERO,
    ))
}

pub fn scripted_agent_provider(responses: Vec<Value>) -> BackendProvider {
    BackendProvider::Local(LocalProvider::with_agent(
        Arc::new(ScriptedAgent { responses }),
        Duration::ZERO,
    ))
}

pub fn remote_provider(connector: Arc<ScriptedConnector>) -> BackendProvider {
    BackendProvider::Remote(RemoteProvider::new(connector, test_target()))
}

pub fn test_target() -> RemoteTarget {
    RemoteTarget {
        engine_id: "42".to_string(),
        project_id: "test-project".to_string(),
        location: "us-central1".to_string(),
        endpoint: "ws://127.0.0.1:1/unused".to_string(),
        call_type: "bidi_stream_query".to_string(),
    }
}

pub fn test_app(provider: BackendProvider) -> Router {
    create_router(AppState::new(provider, fast_settings(10)))
}

/// Local agent that ignores its input and yields a fixed response list.
pub struct ScriptedAgent {
    responses: Vec<Value>,
}

impl LocalAgent for ScriptedAgent {
    fn bidi_stream_query(&self, _input: InputQueue) -> ResponseStream {
        Box::pin(stream::iter(
            self.responses.clone().into_iter().map(Ok::<_, BridgeError>),
        ))
    }
}

// ============================================================================
// Scripted remote engine
// ============================================================================

/// What the next connect attempt does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectScript {
    /// Open a session; the test drives it through an [`EngineEnd`].
    Open,
    /// Fail as if the connection was reset.
    Reset,
    /// Fail with a non-retryable transport error.
    Refuse,
    /// Open a session whose first send resets the connection on both halves.
    ResetOnSend,
}

/// The engine side of one scripted session.
pub struct EngineEnd {
    /// Messages the bridge sent to the engine.
    pub received: fmpsc::UnboundedReceiver<Value>,
    /// Responses to push to the bridge.
    pub responses: fmpsc::UnboundedSender<BridgeResult<Value>>,
}

impl EngineEnd {
    pub async fn next_received(&mut self) -> Value {
        tokio::time::timeout(FRAME_TIMEOUT, self.received.next())
            .await
            .expect("timed out waiting for a message at the engine")
            .expect("bridge closed the engine session")
    }

    pub async fn respond(&mut self, response: Value) {
        self.responses.send(Ok(response)).await.unwrap();
    }

    pub async fn fail(&mut self, error: BridgeError) {
        self.responses.send(Err(error)).await.unwrap();
    }
}

/// Remote connector that follows a script, then a fallback, for every connect.
pub struct ScriptedConnector {
    script: Mutex<VecDeque<ConnectScript>>,
    fallback: ConnectScript,
    connects: AtomicU32,
    ends: mpsc::UnboundedSender<EngineEnd>,
}

impl ScriptedConnector {
    pub fn new(
        script: Vec<ConnectScript>,
        fallback: ConnectScript,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<EngineEnd>) {
        let (ends, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into()),
            fallback,
            connects: AtomicU32::new(0),
            ends,
        };
        (Arc::new(connector), rx)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteConnector for ScriptedConnector {
    async fn connect(&self, _target: &RemoteTarget) -> BridgeResult<RemoteSession> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);

        match step {
            ConnectScript::Reset => Err(BridgeError::AbnormalClosure(
                "connection reset by peer".to_string(),
            )),
            ConnectScript::Refuse => Err(BridgeError::Transport("connection refused".to_string())),
            ConnectScript::Open => {
                let (to_engine, received) = fmpsc::unbounded();
                let (responses, from_engine) = fmpsc::unbounded();
                let _ = self.ends.send(EngineEnd {
                    received,
                    responses,
                });
                let sink = to_engine.sink_map_err(|e| BridgeError::Transport(e.to_string()));
                Ok(RemoteSession::new(Box::pin(sink), Box::pin(from_engine)))
            }
            ConnectScript::ResetOnSend => {
                let (resets, from_engine) = fmpsc::unbounded::<BridgeResult<Value>>();
                let sink = futures::sink::unfold(resets, |resets, _message: Value| async move {
                    let reset = || BridgeError::AbnormalClosure("connection reset by peer".to_string());
                    let _ = resets.unbounded_send(Err(reset()));
                    Err::<fmpsc::UnboundedSender<BridgeResult<Value>>, _>(reset())
                });
                Ok(RemoteSession::new(Box::pin(sink), Box::pin(from_engine)))
            }
        }
    }
}

pub async fn next_engine(ends: &mut mpsc::UnboundedReceiver<EngineEnd>) -> EngineEnd {
    tokio::time::timeout(FRAME_TIMEOUT, ends.recv())
        .await
        .expect("timed out waiting for an engine session")
        .expect("connector dropped")
}

// ============================================================================
// Client harness
// ============================================================================

/// A client driving a [`Session`] without a network transport.
pub struct TestClient {
    frames: fmpsc::UnboundedSender<ClientFrame>,
    outbox: mpsc::UnboundedReceiver<ServerFrame>,
    session: JoinHandle<BridgeResult<()>>,
}

impl TestClient {
    pub fn start(provider: BackendProvider, settings: SessionSettings) -> Self {
        let (frames, client_frames) = fmpsc::unbounded();
        let (client, outbox) = ClientOutbox::channel();
        let session = Session::new(client_frames, client, Arc::new(provider), settings);
        Self {
            frames,
            outbox,
            session: tokio::spawn(session.run()),
        }
    }

    pub fn send_json(&self, value: Value) {
        self.send(ClientFrame::Text(value.to_string()));
    }

    pub fn send(&self, frame: ClientFrame) {
        self.frames.unbounded_send(frame).unwrap();
    }

    pub fn close(&self) {
        self.send(ClientFrame::Close);
    }

    /// Next frame from the bridge; `None` once the session has ended.
    pub async fn next_frame(&mut self) -> Option<ServerFrame> {
        tokio::time::timeout(FRAME_TIMEOUT, self.outbox.recv())
            .await
            .expect("timed out waiting for a frame from the bridge")
    }

    pub async fn expect_frame(&mut self) -> ServerFrame {
        self.next_frame().await.expect("session ended early")
    }

    /// Collect every remaining frame until the session ends.
    pub async fn drain(&mut self) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame().await {
            frames.push(frame);
        }
        frames
    }

    pub async fn finish(self) -> BridgeResult<()> {
        tokio::time::timeout(FRAME_TIMEOUT, self.session)
            .await
            .expect("session did not finish")
            .expect("session task panicked")
    }
}
