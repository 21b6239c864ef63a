//! Session readiness signal.

use std::sync::atomic::{AtomicBool, Ordering};

use agent_bridge_protocol::ServerFrame;
use log::debug;

use crate::error::BridgeResult;
use crate::session::ClientOutbox;

/// Sends `{"setupComplete": {}}` exactly once per client session.
///
/// Only the backend driver completes the handshake, at the point its branch
/// can take input from the queue.
#[derive(Debug, Default)]
pub struct Handshake {
    sent: AtomicBool,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal readiness; later calls (for example after a reconnect) are no-ops.
    pub fn complete(&self, client: &ClientOutbox) -> BridgeResult<()> {
        if self.sent.swap(true, Ordering::AcqRel) {
            debug!("Handshake already completed for this session");
            return Ok(());
        }
        client.send(ServerFrame::SetupComplete)
    }

    pub fn is_complete(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_complete_sent_once() {
        let (client, mut frames) = ClientOutbox::channel();
        let handshake = Handshake::new();

        handshake.complete(&client).unwrap();
        handshake.complete(&client).unwrap();
        drop(client);

        assert_eq!(frames.try_recv().ok(), Some(ServerFrame::SetupComplete));
        assert!(frames.try_recv().is_err());
        assert!(handshake.is_complete());
    }
}
