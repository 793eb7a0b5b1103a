//! One dialed connection: writer, worker pool, ack table and read loop.
//!
//! A session lives from a successful dial until its read loop exits. Close
//! triggers (explicit close, read failure, cancellation of the governing
//! token) race for a single state transition; the winner runs the shutdown
//! sequence and its cause decides what the disconnect hook sees.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU8, Ordering},
};

use bytes::Bytes;
use etp_core::{
    AckCorrelator, AckSink, BufferPool, CloseCode, DispatchPool, EtpError, HandlerRegistry,
    TransportConnection, TransportError,
};
use etp_proto::Frame;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{config::ClientConfig, writer::FrameWriter};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never dialed
    Unopened,
    /// Dialed and reading
    Open,
    /// Shutdown sequence in progress
    Closing,
    /// Connection ended; may be dialed again
    Closed,
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// What won the race to close the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseCause {
    Explicit,
    ReadFailed,
    Canceled,
}

pub(crate) struct Session<C: TransportConnection> {
    conn: Arc<C>,
    writer: Arc<FrameWriter<C>>,
    acks: Arc<AckCorrelator>,
    dispatch: DispatchPool,
    token: CancellationToken,
    state: AtomicU8,
    cause: OnceLock<CloseCause>,
    finished: CancellationToken,
}

impl<C: TransportConnection> Session<C> {
    /// Wrap a dialed connection and start its worker pool.
    ///
    /// `token` governs the session: cancelling it closes the connection.
    pub(crate) fn start(
        conn: C,
        token: CancellationToken,
        config: &ClientConfig,
        registry: Arc<HandlerRegistry>,
        buffers: BufferPool,
    ) -> Arc<Self> {
        let conn = Arc::new(conn);
        let writer = Arc::new(FrameWriter::new(Arc::clone(&conn), token.clone()));
        let sink: Arc<dyn AckSink> = Arc::clone(&writer) as Arc<dyn AckSink>;
        let dispatch =
            DispatchPool::start(config.workers, config.queue_capacity(), registry, sink, buffers);

        Arc::new(Self {
            conn,
            writer,
            acks: AckCorrelator::new(),
            dispatch,
            token,
            state: AtomicU8::new(OPEN),
            cause: OnceLock::new(),
            finished: CancellationToken::new(),
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        match self.state.load(Ordering::Acquire) {
            OPEN => ConnectionState::Open,
            CLOSING => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn acks(&self) -> &Arc<AckCorrelator> {
        &self.acks
    }

    /// Write an encoded frame through the serialized writer.
    pub(crate) async fn write(&self, frame: Bytes) -> Result<(), EtpError> {
        if !self.is_open() {
            return Err(EtpError::ConnectionClosed);
        }
        self.writer.write(frame).await.map_err(|err| match err {
            TransportError::Closed => EtpError::ConnectionClosed,
            err => EtpError::Write(err),
        })
    }

    /// Keep-alive round trip.
    pub(crate) async fn ping(&self) -> Result<(), EtpError> {
        if !self.is_open() {
            return Err(EtpError::ConnectionClosed);
        }
        tokio::select! {
            biased;
            () = self.token.cancelled() => Err(EtpError::ConnectionClosed),
            result = self.conn.ping() => result.map_err(EtpError::Ping),
        }
    }

    /// Run the shutdown sequence if the session is still open.
    ///
    /// Pending acks, queued writers and the read loop are released before
    /// the transport close is awaited. The session reaches `Closed` even if
    /// the returned future is dropped mid-close.
    ///
    /// Returns `None` when another trigger already claimed the transition,
    /// otherwise the outcome of closing the transport.
    pub(crate) async fn shutdown(
        &self,
        code: CloseCode,
        reason: &str,
        cause: CloseCause,
    ) -> Option<Result<(), TransportError>> {
        if self.state.compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return None;
        }
        let _ = self.cause.set(cause);
        info!(%code, reason, ?cause, "closing connection");

        let _closed = MarkClosed(&self.state);
        self.token.cancel();
        self.dispatch.close();
        Some(self.conn.close(code, reason).await)
    }

    /// Resolves once the read loop has exited and the workers drained.
    pub(crate) async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Read loop. Owns the disconnect notification for this session.
    pub(crate) async fn run(self: Arc<Self>, registry: Arc<HandlerRegistry>) {
        let reason = self.read_until_closed(&registry).await;
        debug!(%reason, "read loop exited");

        registry.notify_disconnect(&reason);
        self.dispatch.join().await;
        self.finished.cancel();
    }

    async fn read_until_closed(&self, registry: &HandlerRegistry) -> EtpError {
        loop {
            let message = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    let outcome = self
                        .shutdown(CloseCode::GOING_AWAY, "context canceled", CloseCause::Canceled)
                        .await;
                    if let Some(Err(err)) = outcome {
                        debug!(error = %err, "transport close after cancellation failed");
                    }
                    return self.close_reason(None);
                },
                message = self.conn.read() => message,
            };

            match message {
                Ok((_kind, data)) => self.handle_message(data, registry).await,
                Err(err) => {
                    if self.is_open() {
                        warn!(error = %err, "transport read failed");
                    }
                    let outcome = self
                        .shutdown(CloseCode::INTERNAL_ERROR, "read failed", CloseCause::ReadFailed)
                        .await;
                    if let Some(Err(close_err)) = outcome {
                        debug!(error = %close_err, "transport close after read failure failed");
                    }
                    return self.close_reason(Some(err));
                },
            }
        }
    }

    fn close_reason(&self, read_error: Option<TransportError>) -> EtpError {
        match (self.cause.get(), read_error) {
            (Some(CloseCause::ReadFailed), Some(err)) => EtpError::Read(err),
            (Some(CloseCause::Canceled), _) => EtpError::Canceled,
            _ => EtpError::ConnectionClosed,
        }
    }

    async fn handle_message(&self, data: Bytes, registry: &HandlerRegistry) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "dropping malformed frame");
                registry.notify_error(&EtpError::MalformedFrame(err));
                return;
            },
        };

        if frame.is_ack() {
            let id = frame.correlation_id;
            if id != 0 && !self.acks.resolve(id, frame.payload) {
                debug!(event = %frame.event, correlation_id = id, "ack for unknown request");
            }
            return;
        }

        tokio::select! {
            biased;
            () = self.token.cancelled() => {},
            queued = self.dispatch.enqueue(frame.into()) => {
                if let Err(dropped) = queued {
                    debug!(event = %dropped.event, "dispatch closed, dropping event");
                }
            },
        }
    }
}

/// Moves the session to `Closed` when dropped.
struct MarkClosed<'a>(&'a AtomicU8);

impl Drop for MarkClosed<'_> {
    fn drop(&mut self) {
        self.0.store(CLOSED, Ordering::Release);
    }
}
