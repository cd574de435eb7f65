//! StreamBridge - ordered event delivery from a worker task to the UI loop
//!
//! A bounded, single-use, single-producer/single-consumer queue. The
//! producer side lives on the worker task; the consumer is the
//! single-threaded UI loop, which drains it on every tick. Drain never
//! blocks; push blocks the producer once the queue is full, until the
//! consumer drains or goes away. Order is preserved end to end.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use tracing::warn;

use crate::agent::StreamEvent;

/// Buffered-event capacity of a bridge created by `stream_bridge`
const DEFAULT_CAPACITY: usize = 256;

/// Create a connected producer/consumer pair for one worker invocation
pub fn stream_bridge() -> (BridgeSender, BridgeReceiver) {
    stream_bridge_with_capacity(DEFAULT_CAPACITY)
}

/// Like `stream_bridge` with an explicit queue capacity
pub fn stream_bridge_with_capacity(capacity: usize) -> (BridgeSender, BridgeReceiver) {
    let shared = Arc::new(Shared {
        inner: Mutex::new(Inner {
            queue: VecDeque::new(),
            closed: false,
            terminated: false,
            consumer_gone: false,
        }),
        drained: Condvar::new(),
        capacity,
    });
    (
        BridgeSender {
            shared: shared.clone(),
        },
        BridgeReceiver { shared },
    )
}

struct Shared {
    inner: Mutex<Inner>,
    /// Signalled whenever the consumer drains or drops
    drained: Condvar,
    capacity: usize,
}

struct Inner {
    queue: VecDeque<StreamEvent>,
    /// Set once a terminal event is queued or `close()` is called; further
    /// pushes are a programming error
    closed: bool,
    /// Set once the consumer has drained a terminal event
    terminated: bool,
    /// Set when the receiver drops; pending pushes unblock and drop
    consumer_gone: bool,
}

/// Producer half, held by the worker task
pub struct BridgeSender {
    shared: Arc<Shared>,
}

impl BridgeSender {
    /// Queue an event for the consumer. Preserves submission order.
    ///
    /// Blocks while the queue is at capacity, so a fast producer cannot
    /// outgrow a stalled consumer. The terminal event is always accepted
    /// even at capacity; otherwise a cancelled worker could never settle.
    ///
    /// Pushing after the stream has been sealed is a bug in the caller; it
    /// is logged and the event is dropped, never propagated as a fault.
    pub fn push(&self, event: StreamEvent) {
        let mut inner = self.shared.inner.lock().expect("bridge lock poisoned");
        while !event.is_terminal() && inner.queue.len() >= self.shared.capacity {
            if inner.closed || inner.consumer_gone {
                break;
            }
            inner = self
                .shared
                .drained
                .wait(inner)
                .expect("bridge lock poisoned");
        }
        if inner.consumer_gone {
            return;
        }
        if inner.closed {
            warn!(?event, "push after terminal event; dropping");
            return;
        }
        if event.is_terminal() {
            inner.closed = true;
        }
        inner.queue.push_back(event);
    }

    /// Seal the bridge without queueing an event
    pub fn close(&self) {
        let mut inner = self.shared.inner.lock().expect("bridge lock poisoned");
        inner.closed = true;
        self.shared.drained.notify_all();
    }
}

/// Consumer half, held by the UI loop
pub struct BridgeReceiver {
    shared: Arc<Shared>,
}

impl BridgeReceiver {
    /// Take all pending events, in push order. Non-blocking; returns an
    /// empty vector when nothing is waiting.
    pub fn drain(&self) -> Vec<StreamEvent> {
        let mut inner = self.shared.inner.lock().expect("bridge lock poisoned");
        let events: Vec<StreamEvent> = inner.queue.drain(..).collect();
        if events.iter().any(|e| e.is_terminal()) {
            inner.terminated = true;
        }
        self.shared.drained.notify_all();
        events
    }

    /// True once the consumer has observed the terminal event; the bridge
    /// should be discarded after this
    pub fn is_terminated(&self) -> bool {
        self.shared
            .inner
            .lock()
            .expect("bridge lock poisoned")
            .terminated
    }
}

impl Drop for BridgeReceiver {
    fn drop(&mut self) {
        let mut inner = self.shared.inner.lock().expect("bridge lock poisoned");
        inner.consumer_gone = true;
        self.shared.drained.notify_all();
    }
}
