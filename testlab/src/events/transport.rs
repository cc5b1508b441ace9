//! Channel-based event transport.
//!
//! One bounded channel per run: at-least-once, in-order delivery to a
//! single consumer for the lifetime of one connection. The stream handle
//! is handed out exactly once by `start`, which is what enforces the
//! one-subscription rule. There is no replay: a consumer that disconnects
//! mid-run loses the intermediate progress, by design.

use crate::core::ProgressEvent;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::debug;

/// Creates the sender/stream pair for one run.
#[must_use]
pub fn event_channel(capacity: usize) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender { tx }, EventStream { rx })
}

/// The coordinator's sending half.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ProgressEvent>,
}

impl EventSender {
    /// Pushes one event to the consumer.
    ///
    /// A disconnected consumer never fails the run: the send is dropped
    /// and logged at debug level.
    pub async fn send(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.send(event).await {
            debug!(agent = %e.0.agent, "Consumer gone; dropping progress event");
        }
    }

    /// Returns a raw sender for stage sub-progress reporting.
    #[must_use]
    pub fn raw(&self) -> mpsc::Sender<ProgressEvent> {
        self.tx.clone()
    }

    /// Returns true once the consumer has disconnected.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consumer's receiving half. One per run, handed out once.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<ProgressEvent>,
}

impl EventStream {
    /// Receives the next event, or `None` when the stream closed.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Drains the stream to completion, returning every event in order.
    pub async fn collect_all(mut self) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

impl Stream for EventStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
