//! Backend session driver.
//!
//! Runs one backend branch for one session attempt. The branch is picked by
//! the provider; both complete the handshake only once input can flow.

use std::time::Duration;

use agent_bridge_protocol::{ServerFrame, is_forwardable, response_error, translate_response};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendProvider, LocalProvider, RemoteProvider, RemoteSession, RemoteSink, RemoteStream,
};
use crate::error::{BridgeError, BridgeResult};
use crate::handshake::Handshake;
use crate::queue::InputQueue;
use crate::session::ClientOutbox;

/// Per-session knobs for the driver.
#[derive(Debug, Clone, Default)]
pub struct DriverSettings {
    /// End the remote receive task when the engine is silent this long.
    pub idle_timeout: Option<Duration>,
}

/// Drive the backend until the branch completes or `cancel` fires.
///
/// Returns `Ok` for clean completion, including an agent reporting an error
/// envelope. Only [`BridgeError::AbnormalClosure`] is meant to be retried.
pub async fn run_backend(
    provider: &BackendProvider,
    queue: InputQueue,
    client: &ClientOutbox,
    handshake: &Handshake,
    settings: &DriverSettings,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    match provider {
        BackendProvider::Local(local) => run_local(local, queue, client, handshake, cancel).await,
        BackendProvider::Remote(remote) => {
            run_remote(remote, queue, client, handshake, settings, cancel).await
        }
    }
}

// ============================================================================
// Local branch
// ============================================================================

async fn run_local(
    provider: &LocalProvider,
    queue: InputQueue,
    client: &ClientOutbox,
    handshake: &Handshake,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    let agent = provider.agent().await?;

    // Give the agent a moment before telling the client it can talk.
    tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        _ = tokio::time::sleep(provider.warmup()) => {}
    }
    handshake.complete(client)?;

    let mut responses = agent.bidi_stream_query(queue);
    loop {
        let response = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Local agent stream cancelled");
                return Ok(());
            }
            next = responses.next() => match next {
                Some(response) => response?,
                None => {
                    info!("Local agent stream finished");
                    return Ok(());
                }
            },
        };

        if response.is_null() {
            continue;
        }
        client.send(ServerFrame::Response(response.clone()))?;

        if let Some(err) = response_error(&response) {
            error!("Agent engine error: {}", err);
            return Ok(());
        }
    }
}

// ============================================================================
// Remote branch
// ============================================================================

async fn run_remote(
    provider: &RemoteProvider,
    mut queue: InputQueue,
    client: &ClientOutbox,
    handshake: &Handshake,
    settings: &DriverSettings,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    info!(
        "Connecting to remote agent engine: {}",
        provider.target().resource_name()
    );
    let session = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        session = provider.connect() => session?,
    };
    info!("Remote agent engine connection established");

    if let Err(e) = handshake.complete(client) {
        session.close().await;
        return Err(e);
    }

    let RemoteSession {
        mut sink,
        mut stream,
    } = session;
    let tasks = cancel.child_token();

    let forward = async {
        let result = forward_to_remote(&mut queue, &mut sink, &tasks).await;
        tasks.cancel();
        result
    };
    let receive = async {
        let result = receive_from_remote(&mut stream, client, settings.idle_timeout, &tasks).await;
        tasks.cancel();
        result
    };
    let (forwarded, received) = tokio::join!(forward, receive);

    RemoteSession::new(sink, stream).close().await;
    received.and(forwarded)
}

/// Queue → engine. Ends on queue close, send failure, or cancellation.
///
/// An abnormal closure seen while sending is returned for the supervisor;
/// other send failures are logged and only end this task.
async fn forward_to_remote(
    queue: &mut InputQueue,
    sink: &mut RemoteSink,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            message = queue.recv() => match message {
                Some(message) => message,
                None => {
                    debug!("Input queue closed; stopping forward to remote");
                    return Ok(());
                }
            },
        };

        match sink.send(message.to_wire()).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => return Err(e),
            Err(e) => {
                error!("Error forwarding to remote: {}", e);
                return Ok(());
            }
        }
    }
}

/// Engine → client. Ends on engine close, an error envelope, a receive
/// failure, or cancellation.
///
/// Abnormal closure (and a tripped idle watchdog) is returned so the session
/// can reconnect; other receive failures are logged and end the task.
async fn receive_from_remote(
    stream: &mut RemoteStream,
    client: &ClientOutbox,
    idle_timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> BridgeResult<()> {
    loop {
        // Frames already queued on the stream win over cancellation.
        let next = tokio::select! {
            biased;
            next = next_with_watchdog(stream, idle_timeout) => next?,
            _ = cancel.cancelled() => return Ok(()),
        };

        let response = match next {
            None => {
                info!("Remote agent engine closed the session");
                return Ok(());
            }
            Some(Ok(response)) => response,
            Some(Err(e)) if e.is_retryable() => return Err(e),
            Some(Err(e)) => {
                error!("Error receiving from remote: {}", e);
                return Ok(());
            }
        };

        let translated = translate_response(response.clone());
        if is_forwardable(&translated) {
            client.send(ServerFrame::Response(translated))?;
        }

        if let Some(err) = response_error(&response) {
            error!("Remote agent engine error: {}", err);
            return Ok(());
        }
    }
}

async fn next_with_watchdog(
    stream: &mut RemoteStream,
    idle_timeout: Option<Duration>,
) -> BridgeResult<Option<BridgeResult<serde_json::Value>>> {
    let Some(limit) = idle_timeout else {
        return Ok(stream.next().await);
    };
    tokio::time::timeout(limit, stream.next())
        .await
        .map_err(|_| BridgeError::AbnormalClosure(format!("no engine traffic for {limit:?}")))
}
