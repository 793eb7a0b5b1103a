//! Serialized frame writer.
//!
//! Callers emitting events and workers sending acks write concurrently.
//! Every write goes through one async lock so whole messages never
//! interleave, whatever the transport does internally.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use etp_core::{AckSink, MessageKind, TransportConnection, TransportError};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub(crate) struct FrameWriter<C> {
    conn: Arc<C>,
    lock: Mutex<()>,
    closed: CancellationToken,
}

impl<C: TransportConnection> FrameWriter<C> {
    pub(crate) fn new(conn: Arc<C>, closed: CancellationToken) -> Self {
        Self { conn, lock: Mutex::new(()), closed }
    }

    /// Write one encoded frame. Fails with [`TransportError::Closed`] once
    /// the connection's token is cancelled, including while queued behind
    /// other writers.
    pub(crate) async fn write(&self, frame: Bytes) -> Result<(), TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            result = async {
                let _serialized = self.lock.lock().await;
                self.conn.write(MessageKind::Binary, frame).await
            } => result,
        }
    }
}

#[async_trait]
impl<C: TransportConnection> AckSink for FrameWriter<C> {
    async fn send_ack(&self, frame: Bytes) -> Result<(), TransportError> {
        self.write(frame).await
    }
}
