//! Client facade.

use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use etp_core::{
    BufferPool, CloseCode, EtpError, HandlerRegistry, IdGenerator, SequentialIdGenerator,
    Transport, TransportConnection,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::ClientConfig,
    session::{CloseCause, ConnectionState, Session},
};

/// Event protocol client over transport `T`.
///
/// Cheap to clone; clones share the connection and the handler registry.
/// Handlers and hooks may be registered before or after dialing.
pub struct Client<T: Transport> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Transport> {
    transport: T,
    config: ClientConfig,
    registry: Arc<HandlerRegistry>,
    ids: Arc<dyn IdGenerator>,
    buffers: BufferPool,
    session: RwLock<Option<Arc<Session<T::Connection>>>>,
    dial_lock: Mutex<()>,
}

impl<T: Transport> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Transport> Drop for Inner<T> {
    fn drop(&mut self) {
        let session = self.session.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(session) = session {
            session.token().cancel();
        }
    }
}

impl<T: Transport> Client<T> {
    /// Create an unopened client.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self::with_id_generator(transport, config, Arc::new(SequentialIdGenerator::new()))
    }

    /// Create an unopened client drawing correlation ids from `ids`.
    pub fn with_id_generator(
        transport: T,
        config: ClientConfig,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let config = config.normalized();
        let buffers =
            BufferPool::with_capacity(config.workers.saturating_mul(2), config.buffer_capacity);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                registry: Arc::new(HandlerRegistry::new()),
                ids,
                buffers,
                session: RwLock::new(None),
                dial_lock: Mutex::new(()),
            }),
        }
    }

    /// Effective configuration (zero settings replaced by defaults).
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Handler registry shared with the worker pool.
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Connect to `address` and start reading.
    pub async fn dial(&self, address: &str) -> Result<(), EtpError> {
        self.dial_with_parent(address, &CancellationToken::new()).await
    }

    /// Connect to `address` under `parent`: cancelling it aborts the dial or,
    /// once connected, closes the connection.
    ///
    /// Starts the worker pool, invokes the connect hook, then starts the read
    /// loop. A closed client may be dialed again; the dial first waits for the
    /// previous connection's read loop and workers to finish.
    ///
    /// # Errors
    ///
    /// - [`EtpError::AlreadyConnected`] if a connection is open or closing
    /// - [`EtpError::Dial`] if the transport fails
    /// - [`EtpError::Canceled`] if `parent` fires during the handshake
    pub async fn dial_with_parent(
        &self,
        address: &str,
        parent: &CancellationToken,
    ) -> Result<(), EtpError> {
        let _dialing = self.inner.dial_lock.lock().await;
        if let Some(previous) = self.session() {
            if previous.state() != ConnectionState::Closed {
                return Err(EtpError::AlreadyConnected);
            }
            // The previous disconnect hook runs before this connect hook.
            tokio::select! {
                biased;
                () = parent.cancelled() => return Err(EtpError::Canceled),
                () = previous.finished() => {},
            }
        }

        let token = parent.child_token();
        let config = &self.inner.config;
        let conn = tokio::select! {
            biased;
            () = token.cancelled() => return Err(EtpError::Canceled),
            conn = self.inner.transport.dial(address, &config.dial) => conn.map_err(EtpError::Dial)?,
        };
        if config.read_limit != 0 {
            conn.set_read_limit(config.read_limit);
        }

        let session = Session::start(
            conn,
            token,
            config,
            Arc::clone(&self.inner.registry),
            self.inner.buffers.clone(),
        );
        *self.inner.session.write().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::clone(&session));
        info!(address, workers = config.workers, "connected");

        self.inner.registry.notify_connect();
        tokio::spawn(session.run(Arc::clone(&self.inner.registry)));
        Ok(())
    }

    /// Send a fire-and-forget event.
    ///
    /// # Errors
    ///
    /// - [`EtpError::NotConnected`] before the first dial
    /// - [`EtpError::ConnectionClosed`] once the connection is closing
    /// - [`EtpError::Encode`] for an empty or oversized event name
    /// - [`EtpError::Write`] if the transport rejects the message
    pub async fn emit(&self, event: &str, payload: impl AsRef<[u8]>) -> Result<(), EtpError> {
        let session = self.open_session()?;
        let frame = self.encode(event, 0, payload.as_ref())?;
        session.write(frame).await
    }

    /// Send an event and wait for the peer's acknowledgement payload.
    ///
    /// # Errors
    ///
    /// As [`Client::emit`], plus [`EtpError::ConnectionClosed`] if the
    /// connection ends before the acknowledgement arrives.
    pub async fn emit_with_ack(
        &self,
        event: &str,
        payload: impl AsRef<[u8]>,
    ) -> Result<Bytes, EtpError> {
        self.emit_with_ack_cancellable(event, payload, &CancellationToken::new()).await
    }

    /// [`Client::emit_with_ack`] that gives up with [`EtpError::Canceled`]
    /// when `cancel` fires, including while the request is still waiting to
    /// be written.
    ///
    /// The pending entry is removed on every exit path, so a late
    /// acknowledgement is discarded.
    pub async fn emit_with_ack_cancellable(
        &self,
        event: &str,
        payload: impl AsRef<[u8]>,
        cancel: &CancellationToken,
    ) -> Result<Bytes, EtpError> {
        let session = self.open_session()?;
        let id = self.inner.ids.next_id();
        let frame = self.encode(event, id, payload.as_ref())?;

        let waiter = session.acks().register(id, cancel.clone(), session.token().clone())?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EtpError::Canceled),
            written = session.write(frame) => written?,
        }
        debug!(event, correlation_id = id, "awaiting acknowledgement");

        waiter.wait().await.map_err(EtpError::from)
    }

    /// Register a handler for `event` (replaces any existing handler).
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.inner.registry.on(event, handler);
        self
    }

    /// Register a replying handler for `event`; its return value is sent
    /// back as the acknowledgement payload.
    pub fn on_with_ack<F>(&self, event: impl Into<String>, handler: F) -> &Self
    where
        F: Fn(Bytes) -> Bytes + Send + Sync + 'static,
    {
        self.inner.registry.on_with_ack(event, handler);
        self
    }

    /// Remove the handler for `event`. Returns whether one was registered.
    pub fn unsubscribe(&self, event: &str) -> bool {
        self.inner.registry.unsubscribe(event)
    }

    /// Register the handler for events without a specific handler.
    pub fn on_default<F>(&self, handler: F) -> &Self
    where
        F: Fn(&str, Bytes) + Send + Sync + 'static,
    {
        self.inner.registry.on_default(handler);
        self
    }

    /// Hook invoked after every successful dial.
    pub fn on_connect<F>(&self, hook: F) -> &Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.registry.on_connect(hook);
        self
    }

    /// Hook invoked once per connection when its read loop exits.
    pub fn on_disconnect<F>(&self, hook: F) -> &Self
    where
        F: Fn(&EtpError) + Send + Sync + 'static,
    {
        self.inner.registry.on_disconnect(hook);
        self
    }

    /// Hook invoked for non-fatal failures (malformed frames, failed acks,
    /// panicking handlers).
    pub fn on_error<F>(&self, hook: F) -> &Self
    where
        F: Fn(&EtpError) + Send + Sync + 'static,
    {
        self.inner.registry.on_error(hook);
        self
    }

    /// Keep-alive round trip.
    pub async fn ping(&self) -> Result<(), EtpError> {
        self.open_session()?.ping().await
    }

    /// Close with [`CloseCode::NORMAL`].
    pub async fn close(&self) -> Result<(), EtpError> {
        self.close_with_code(CloseCode::NORMAL, "").await
    }

    /// Close with `code` and `reason`. Only the first close trigger has an
    /// effect; later calls return `Ok`.
    ///
    /// # Errors
    ///
    /// - [`EtpError::NotConnected`] before the first dial
    /// - [`EtpError::Close`] if the transport failed to close cleanly
    pub async fn close_with_code(&self, code: CloseCode, reason: &str) -> Result<(), EtpError> {
        let session = self.session().ok_or(EtpError::NotConnected)?;
        match session.shutdown(code, reason, CloseCause::Explicit).await {
            Some(result) => result.map_err(EtpError::Close),
            None => Ok(()),
        }
    }

    /// True once the current connection began closing. False before the
    /// first dial.
    pub fn closed(&self) -> bool {
        matches!(self.state(), ConnectionState::Closing | ConnectionState::Closed)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        match self.session() {
            Some(session) => session.state(),
            None => ConnectionState::Unopened,
        }
    }

    /// Wait until the current connection's read loop has exited and its
    /// workers drained. Returns immediately when never dialed.
    pub async fn wait_closed(&self) {
        if let Some(session) = self.session() {
            session.finished().await;
        }
    }

    /// Acknowledgements currently awaited on the open connection.
    pub fn pending_acks(&self) -> usize {
        match self.session() {
            Some(session) => session.acks().pending_count(),
            None => 0,
        }
    }

    fn session(&self) -> Option<Arc<Session<T::Connection>>> {
        self.inner.session.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn open_session(&self) -> Result<Arc<Session<T::Connection>>, EtpError> {
        match self.session() {
            None => Err(EtpError::NotConnected),
            Some(session) if session.is_open() => Ok(session),
            Some(_) => Err(EtpError::ConnectionClosed),
        }
    }

    fn encode(&self, event: &str, correlation_id: u64, payload: &[u8]) -> Result<Bytes, EtpError> {
        let mut buf = self.inner.buffers.get();
        etp_proto::encode(event, correlation_id, payload, &mut buf).map_err(EtpError::Encode)?;
        Ok(buf.split().freeze())
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("workers", &self.inner.config.workers)
            .finish_non_exhaustive()
    }
}
