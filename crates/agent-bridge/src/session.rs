//! One client connection through the bridge.
//!
//! A session owns the client's frame stream and outbound channel for its
//! whole lifetime. Each attempt gets a fresh input queue and runs the client
//! receive loop next to the backend driver; the reconnect supervisor repeats
//! attempts after abnormal backend closures.

use std::sync::Arc;
use std::time::Duration;

use agent_bridge_protocol::ServerFrame;
use async_trait::async_trait;
use futures::Stream;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::BackendProvider;
use crate::driver::{DriverSettings, run_backend};
use crate::error::{BridgeError, BridgeResult};
use crate::handshake::Handshake;
use crate::queue::input_queue;
use crate::receive::{ClientFrame, ReceiveOutcome, receive_from_client};
use crate::supervisor::{RetryPolicy, RetryableRun, supervise};

/// Ordered outbound channel to the client's writer task.
#[derive(Debug, Clone)]
pub struct ClientOutbox {
    tx: mpsc::UnboundedSender<ServerFrame>,
}

impl ClientOutbox {
    /// Create an outbox and the receiver a writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, frame: ServerFrame) -> BridgeResult<()> {
        self.tx.send(frame).map_err(|_| BridgeError::ClientClosed)
    }
}

/// Settings shared by every session of a process.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Input queue depth that triggers a warning; zero disables it.
    pub queue_warn_depth: usize,
    /// Engine silence that counts as an abnormal closure.
    pub idle_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_warn_depth: 1024,
            idle_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

/// A client session over any transport that yields [`ClientFrame`]s.
pub struct Session<S> {
    frames: S,
    client: ClientOutbox,
    provider: Arc<BackendProvider>,
    handshake: Handshake,
    settings: SessionSettings,
}

impl<S> Session<S>
where
    S: Stream<Item = ClientFrame> + Unpin + Send,
{
    pub fn new(
        frames: S,
        client: ClientOutbox,
        provider: Arc<BackendProvider>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            frames,
            client,
            provider,
            handshake: Handshake::new(),
            settings,
        }
    }

    /// Run the session under the reconnect supervisor.
    ///
    /// A client disconnect ends the session cleanly. Errors are
    /// session-fatal; the caller reports them and closes the connection.
    pub async fn run(mut self) -> BridgeResult<()> {
        let policy = self.settings.retry.clone();
        let client = self.client.clone();
        info!(
            "Starting bidirectional communication with {} agent",
            self.provider.mode_name()
        );
        match supervise(&policy, &client, &mut self).await {
            Err(BridgeError::ClientClosed) => {
                info!("Client disconnected; session finished");
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl<S> RetryableRun for Session<S>
where
    S: Stream<Item = ClientFrame> + Unpin + Send,
{
    async fn run_once(&mut self) -> BridgeResult<()> {
        let (sender, queue) = input_queue(self.settings.queue_warn_depth);
        let cancel = CancellationToken::new();
        let driver_settings = DriverSettings {
            idle_timeout: self.settings.idle_timeout,
        };

        let frames = &mut self.frames;
        let client = &self.client;
        let handshake = &self.handshake;
        let provider = self.provider.as_ref();

        let receive = async {
            let outcome = receive_from_client(frames, sender, &cancel).await;
            debug!("Client receive loop ended: {:?}", outcome);
            if outcome == ReceiveOutcome::ClientClosed {
                cancel.cancel();
            }
            outcome
        };
        let drive = async {
            let result =
                run_backend(provider, queue, client, handshake, &driver_settings, &cancel).await;
            cancel.cancel();
            result
        };

        let (outcome, result) = tokio::join!(receive, drive);
        if outcome == ReceiveOutcome::ClientClosed {
            if let Err(e) = result {
                debug!("Backend ended after client disconnect: {}", e);
            }
            return Err(BridgeError::ClientClosed);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_reports_closed_client() {
        let (client, frames) = ClientOutbox::channel();
        drop(frames);
        assert!(matches!(
            client.send(ServerFrame::SetupComplete),
            Err(BridgeError::ClientClosed)
        ));
    }
}
