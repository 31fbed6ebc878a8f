//! Wire - the event channel shared by every runnable in one execution.
//!
//! One Wire is created at the entry point and passed down through the
//! ExecutionContext. Arbitrarily nested producers write into it; a single
//! consumer (normally the API boundary) reads it as a stream. This replaces
//! per-runnable iterator chaining and keeps event ordering in one place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};

use crate::StepEvent;

enum WireItem {
    Event(Box<StepEvent>),
    Closed,
}

#[derive(Clone)]
enum WireSender {
    Bounded(mpsc::Sender<WireItem>),
    Unbounded(mpsc::UnboundedSender<WireItem>),
}

enum WireReceiver {
    Bounded(mpsc::Receiver<WireItem>),
    Unbounded(mpsc::UnboundedReceiver<WireItem>),
}

impl WireReceiver {
    async fn recv(&mut self) -> Option<WireItem> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Multi-producer single-consumer event channel with close semantics.
///
/// Cloning shares the underlying channel. Writes after `close` are silently
/// dropped so that racy nested producers degrade gracefully instead of
/// erroring; only the top-level executor is supposed to close the Wire.
#[derive(Clone)]
pub struct Wire {
    tx: WireSender,
    closed: Arc<AtomicBool>,
    rx: Arc<Mutex<Option<WireReceiver>>>,
}

impl Wire {
    /// Unbounded Wire. Producers never block.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: WireSender::Unbounded(tx),
            closed: Arc::new(AtomicBool::new(false)),
            rx: Arc::new(Mutex::new(Some(WireReceiver::Unbounded(rx)))),
        }
    }

    /// Bounded Wire. Producers block when the consumer falls behind, which
    /// is the back-pressure contract at the API boundary.
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: WireSender::Bounded(tx),
            closed: Arc::new(AtomicBool::new(false)),
            rx: Arc::new(Mutex::new(Some(WireReceiver::Bounded(rx)))),
        }
    }

    /// Write an event. A no-op once the Wire is closed.
    pub async fn write(&self, event: StepEvent) {
        if self.is_closed() {
            return;
        }
        match &self.tx {
            WireSender::Bounded(tx) => {
                let _ = tx.send(WireItem::Event(Box::new(event))).await;
            }
            WireSender::Unbounded(tx) => {
                let _ = tx.send(WireItem::Event(Box::new(event)));
            }
        }
    }

    /// Non-blocking write. Drops the event when the channel is full or closed.
    pub fn write_nowait(&self, event: StepEvent) {
        if self.is_closed() {
            return;
        }
        match &self.tx {
            WireSender::Bounded(tx) => {
                let _ = tx.try_send(WireItem::Event(Box::new(event)));
            }
            WireSender::Unbounded(tx) => {
                let _ = tx.send(WireItem::Event(Box::new(event)));
            }
        }
    }

    /// Close the Wire. Idempotent; nested close attempts are no-ops.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        match &self.tx {
            WireSender::Bounded(tx) => {
                let _ = tx.send(WireItem::Closed).await;
            }
            WireSender::Unbounded(tx) => {
                let _ = tx.send(WireItem::Closed);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Consume events until the close sentinel.
    ///
    /// The receiver half is taken by the first call; any later reader gets a
    /// stream that terminates immediately, so it still observes the end of
    /// the execution rather than hanging.
    pub fn read(&self) -> BoxStream<'static, StepEvent> {
        let rx = Arc::clone(&self.rx);
        async_stream::stream! {
            let mut receiver = match rx.lock().await.take() {
                Some(receiver) => receiver,
                None => return,
            };
            while let Some(item) = receiver.recv().await {
                match item {
                    WireItem::Event(event) => yield *event,
                    WireItem::Closed => break,
                }
            }
        }
        .boxed()
    }
}

impl Default for Wire {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Wire {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wire")
            .field("closed", &self.is_closed())
            .finish()
    }
}
