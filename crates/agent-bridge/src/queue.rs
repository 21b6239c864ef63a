//! Per-session input queue.
//!
//! An unbounded FIFO between the client receive loop (single writer) and the
//! backend driver (single reader). Nothing is dropped or reordered; the queue
//! only logs when its depth crosses the configured warning threshold.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use agent_bridge_protocol::InboundMessage;
use futures::Stream;
use log::warn;
use thiserror::Error;
use tokio::sync::mpsc;

/// Why a message was not enqueued.
#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    /// Setup frames never reach an agent.
    #[error("setup frames are not forwarded")]
    SetupFrame,
    /// The reading side is gone.
    #[error("input queue closed")]
    Closed,
}

/// Create a connected sender/queue pair.
///
/// `warn_depth` of zero disables the depth warning.
pub fn input_queue(warn_depth: usize) -> (InputSender, InputQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        InputSender {
            tx,
            depth: depth.clone(),
            warn_depth,
        },
        InputQueue { rx, depth },
    )
}

/// Writing half, owned by the client receive loop.
#[derive(Debug)]
pub struct InputSender {
    tx: mpsc::UnboundedSender<InboundMessage>,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
}

impl InputSender {
    pub fn push(&self, message: InboundMessage) -> Result<(), QueueError> {
        if message.is_setup() {
            return Err(QueueError::SetupFrame);
        }
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        if self.tx.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return Err(QueueError::Closed);
        }
        if self.warn_depth > 0 && depth == self.warn_depth {
            warn!(
                "Input queue reached {} pending messages; the backend is not keeping up",
                depth
            );
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Reading half, consumed by the backend driver or handed to a local agent.
#[derive(Debug)]
pub struct InputQueue {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
    depth: Arc<AtomicUsize>,
}

impl InputQueue {
    /// Wait for the next message; `None` once the sender is gone and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        let message = self.rx.recv().await;
        if message.is_some() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        message
    }

    /// Messages enqueued but not yet taken.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Stream for InputQueue {
    type Item = InboundMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(_)) = &polled {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        polled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::StreamExt;
    use serde_json::{Map, json};

    fn text(i: usize) -> InboundMessage {
        let Some(map) = json!({ "seq": i }).as_object().cloned() else {
            unreachable!()
        };
        InboundMessage::Json(map)
    }

    #[tokio::test]
    async fn test_dequeue_order_matches_enqueue_order() {
        for n in [0usize, 1, 2, 17, 256] {
            let (tx, mut queue) = input_queue(0);
            for i in 0..n {
                tx.push(text(i)).unwrap();
            }
            drop(tx);

            let mut seen = Vec::new();
            while let Some(msg) = queue.recv().await {
                seen.push(msg);
            }
            let expected: Vec<_> = (0..n).map(text).collect();
            assert_eq!(seen, expected);
        }
    }

    #[tokio::test]
    async fn test_setup_frames_rejected() {
        let (tx, mut queue) = input_queue(0);
        let mut setup = Map::new();
        setup.insert("setup".into(), json!({"user": "u"}));

        assert_eq!(tx.push(InboundMessage::Setup(setup)), Err(QueueError::SetupFrame));
        tx.push(text(1)).unwrap();
        drop(tx);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.recv().await, Some(text(1)));
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_stream_tracks_depth() {
        let (tx, queue) = input_queue(2);
        tx.push(text(0)).unwrap();
        tx.push(InboundMessage::Binary(Bytes::from_static(b"abcd"))).unwrap();
        tx.push(text(2)).unwrap();
        assert_eq!(queue.len(), 3);
        drop(tx);

        let drained: Vec<_> = queue.collect().await;
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[1], InboundMessage::Binary(Bytes::from_static(b"abcd")));
    }

    #[test]
    fn test_push_after_reader_dropped() {
        let (tx, queue) = input_queue(0);
        drop(queue);
        assert!(tx.is_closed());
        assert_eq!(tx.push(text(0)), Err(QueueError::Closed));
    }
}
