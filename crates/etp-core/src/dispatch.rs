//! Dispatch worker pool.
//!
//! The read loop is the only producer; a fixed set of workers drain a
//! bounded queue and invoke registry handlers. A full queue suspends the
//! producer, which is the backpressure path from slow handlers to the
//! transport. Closing the queue lets workers finish what is already queued,
//! then exit; [`DispatchPool::join`] waits for the last one.
//!
//! ```text
//! read loop ──enqueue──> [ bounded queue ] ──recv──> worker 0..N
//!                                                     │
//!                                  reply handler? ────┴──> AckSink (ack frame)
//! ```

use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use etp_proto::{Frame, ack_event_name};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::{
    error::{EtpError, TransportError},
    pool::{BufferPool, PooledBuf},
    registry::HandlerRegistry,
};

/// A decoded inbound event waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Event name
    pub event: String,
    /// Correlation id; non-zero when the peer waits for a reply
    pub correlation_id: u64,
    /// Opaque payload
    pub payload: Bytes,
}

impl From<Frame> for InboundEvent {
    fn from(frame: Frame) -> Self {
        Self { event: frame.event, correlation_id: frame.correlation_id, payload: frame.payload }
    }
}

/// Destination for acknowledgement frames produced by workers.
#[async_trait]
pub trait AckSink: Send + Sync + 'static {
    /// Write one encoded acknowledgement frame.
    async fn send_ack(&self, frame: Bytes) -> Result<(), TransportError>;
}

/// Fixed pool of dispatch workers fed by a bounded queue.
#[derive(Debug)]
pub struct DispatchPool {
    queue: async_channel::Sender<InboundEvent>,
    tracker: TaskTracker,
    workers: usize,
}

impl DispatchPool {
    /// Spawn `workers` workers on the current tokio runtime, sharing a queue
    /// of `capacity` slots. Both values are raised to at least 1.
    pub fn start(
        workers: usize,
        capacity: usize,
        registry: Arc<HandlerRegistry>,
        sink: Arc<dyn AckSink>,
        buffers: BufferPool,
    ) -> Self {
        let workers = workers.max(1);
        let (queue, receiver) = async_channel::bounded(capacity.max(1));
        let tracker = TaskTracker::new();

        for id in 0..workers {
            let worker = Worker {
                id,
                queue: receiver.clone(),
                registry: Arc::clone(&registry),
                sink: Arc::clone(&sink),
                buffers: buffers.clone(),
            };
            tracker.spawn(worker.run());
        }
        tracker.close();

        Self { queue, tracker, workers }
    }

    /// Queue an event, waiting while the queue is full.
    ///
    /// Hands the event back if the queue has been closed.
    pub async fn enqueue(&self, event: InboundEvent) -> Result<(), InboundEvent> {
        self.queue.send(event).await.map_err(async_channel::SendError::into_inner)
    }

    /// Close the queue. Workers drain remaining events, then exit.
    ///
    /// Returns `true` if this call closed it.
    pub fn close(&self) -> bool {
        self.queue.close()
    }

    /// True once the queue is closed.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Events currently waiting for a worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queue capacity.
    pub fn capacity(&self) -> usize {
        self.queue.capacity().unwrap_or(usize::MAX)
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Wait until every worker has exited. Only resolves after
    /// [`DispatchPool::close`].
    pub async fn join(&self) {
        self.tracker.wait().await;
    }
}

struct Worker {
    id: usize,
    queue: async_channel::Receiver<InboundEvent>,
    registry: Arc<HandlerRegistry>,
    sink: Arc<dyn AckSink>,
    buffers: BufferPool,
}

impl Worker {
    async fn run(self) {
        let mut scratch = self.buffers.get();
        while let Ok(item) = self.queue.recv().await {
            self.dispatch(item, &mut scratch).await;
        }
        debug!(worker = self.id, "dispatch worker exiting");
    }

    async fn dispatch(&self, item: InboundEvent, scratch: &mut PooledBuf) {
        let InboundEvent { event, correlation_id, payload } = item;

        if correlation_id != 0 {
            let Some(handler) = self.registry.reply_handler(&event) else {
                debug!(%event, correlation_id, "no reply handler, dropping request");
                return;
            };
            if let Some(reply) = self.guarded(&event, || handler(payload)) {
                self.reply(&event, correlation_id, &reply, scratch).await;
            }
            return;
        }

        if let Some(handler) = self.registry.event_handler(&event) {
            self.guarded(&event, || handler(payload));
        } else if let Some(handler) = self.registry.default_handler() {
            self.guarded(&event, || handler(&event, payload));
        } else {
            debug!(%event, "no handler, dropping event");
        }
    }

    async fn reply(&self, event: &str, correlation_id: u64, reply: &[u8], scratch: &mut PooledBuf) {
        scratch.clear();
        if let Err(err) = etp_proto::encode(&ack_event_name(event), correlation_id, reply, scratch)
        {
            warn!(event, error = %err, "failed to encode ack");
            self.registry.notify_error(&EtpError::Encode(err));
            return;
        }

        let frame = scratch.split().freeze();
        if let Err(source) = self.sink.send_ack(frame).await {
            warn!(event, correlation_id, error = %source, "failed to send ack");
            self.registry.notify_error(&EtpError::AckWrite { event: event.to_owned(), source });
        }
    }

    /// Run a user handler, turning a panic into an error hook call.
    fn guarded<R>(&self, event: &str, f: impl FnOnce() -> R) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(worker = self.id, event, "handler panicked");
                self.registry.notify_error(&EtpError::HandlerPanicked { event: event.to_owned() });
                None
            },
        }
    }
}
