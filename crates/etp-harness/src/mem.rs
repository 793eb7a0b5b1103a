//! In-memory transport.
//!
//! A [`MemNetwork`] maps addresses to listeners. Dialing creates two
//! connected [`MemConnection`]s, one handed to the dialer and one queued on
//! the listener. Messages are delivered in order without size limits other
//! than the configured read limit.

use std::{
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use etp_core::{CloseCode, DialOptions, MessageKind, Transport, TransportConnection, TransportError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

enum Wire {
    Data(MessageKind, Bytes),
    Close(CloseCode, String),
    Reset,
}

/// Counters for one side of an in-memory connection.
#[derive(Debug, Default)]
pub struct ConnStats {
    writes: AtomicUsize,
    closes: AtomicUsize,
    pings: AtomicUsize,
    peer_close: Mutex<Option<(CloseCode, String)>>,
}

impl ConnStats {
    /// Messages written.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Calls to `close` that reached the wire.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Pings sent.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Close code and reason received from the peer, if any.
    pub fn peer_close(&self) -> Option<(CloseCode, String)> {
        self.peer_close.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Faults applied to connections that share them.
///
/// Stalled operations never complete; they only end when the caller drops
/// the future.
#[derive(Debug, Default)]
pub struct Faults {
    stall_close: AtomicBool,
    stall_writes: AtomicBool,
    fail_close: AtomicBool,
}

impl Faults {
    /// Make `close` hang.
    pub fn stall_close(&self, stall: bool) {
        self.stall_close.store(stall, Ordering::SeqCst);
    }

    /// Make `close` fail with an I/O error after the close reaches the wire.
    pub fn fail_close(&self, fail: bool) {
        self.fail_close.store(fail, Ordering::SeqCst);
    }

    /// Make `write` hang.
    pub fn stall_writes(&self, stall: bool) {
        self.stall_writes.store(stall, Ordering::SeqCst);
    }

    async fn hold(flag: &AtomicBool) {
        if flag.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

/// One end of an in-memory connection.
pub struct MemConnection {
    tx: async_channel::Sender<Wire>,
    rx: async_channel::Receiver<Wire>,
    closed: CancellationToken,
    read_limit: AtomicUsize,
    headers: Vec<(String, String)>,
    stats: Arc<ConnStats>,
    faults: Arc<Faults>,
}

/// Two connected endpoints.
pub fn pair() -> (MemConnection, MemConnection) {
    pair_with_headers(Vec::new())
}

fn pair_with_headers(headers: Vec<(String, String)>) -> (MemConnection, MemConnection) {
    let (a_tx, a_rx) = async_channel::unbounded();
    let (b_tx, b_rx) = async_channel::unbounded();
    let dialer = MemConnection::new(a_tx, b_rx, Vec::new());
    let acceptor = MemConnection::new(b_tx, a_rx, headers);
    (dialer, acceptor)
}

impl MemConnection {
    fn new(
        tx: async_channel::Sender<Wire>,
        rx: async_channel::Receiver<Wire>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            tx,
            rx,
            closed: CancellationToken::new(),
            read_limit: AtomicUsize::new(0),
            headers,
            stats: Arc::new(ConnStats::default()),
            faults: Arc::new(Faults::default()),
        }
    }

    /// Handshake headers sent by the dialer (empty on the dialing side).
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Shared counters for this endpoint.
    pub fn stats(&self) -> Arc<ConnStats> {
        Arc::clone(&self.stats)
    }

    /// Faults injected into this endpoint.
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    /// Reset the connection: the peer's next read fails with an I/O error.
    pub fn abort(&self) {
        let _ = self.tx.try_send(Wire::Reset);
        self.closed.cancel();
    }

    /// Send raw bytes, bypassing any framing. Used to inject malformed
    /// messages.
    pub fn inject(&self, data: impl Into<Bytes>) -> Result<(), TransportError> {
        self.tx
            .try_send(Wire::Data(MessageKind::Binary, data.into()))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl TransportConnection for MemConnection {
    async fn write(&self, kind: MessageKind, data: Bytes) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        Faults::hold(&self.faults.stall_writes).await;
        self.tx.send(Wire::Data(kind, data)).await.map_err(|_| TransportError::Closed)?;
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError> {
        let wire = tokio::select! {
            biased;
            () = self.closed.cancelled() => return Err(TransportError::Closed),
            wire = self.rx.recv() => wire,
        };

        match wire {
            Ok(Wire::Data(kind, data)) => {
                let limit = self.read_limit.load(Ordering::Relaxed);
                if limit != 0 && data.len() > limit {
                    return Err(TransportError::ReadLimitExceeded { size: data.len(), limit });
                }
                Ok((kind, data))
            },
            Ok(Wire::Close(code, reason)) => {
                debug!(%code, reason, "peer closed connection");
                *self.stats.peer_close.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some((code, reason));
                self.closed.cancel();
                Err(TransportError::Closed)
            },
            Ok(Wire::Reset) => {
                self.closed.cancel();
                Err(TransportError::Io(io::Error::from(io::ErrorKind::ConnectionReset)))
            },
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        Faults::hold(&self.faults.stall_close).await;
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self.tx.try_send(Wire::Close(code, reason.to_owned()));
        self.closed.cancel();
        if self.faults.fail_close.load(Ordering::SeqCst) {
            return Err(TransportError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() || self.tx.is_closed() {
            return Err(TransportError::Closed);
        }
        self.stats.pings.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_read_limit(&self, limit: usize) {
        self.read_limit.store(limit, Ordering::Relaxed);
    }
}

/// Accepts connections dialed to one address.
pub struct MemListener {
    incoming: async_channel::Receiver<MemConnection>,
}

impl MemListener {
    /// Next dialed connection, or `None` once the network is dropped.
    pub async fn accept(&self) -> Option<MemConnection> {
        self.incoming.recv().await.ok()
    }
}

/// Address book of in-memory listeners.
#[derive(Clone, Default)]
pub struct MemNetwork {
    listeners: Arc<Mutex<HashMap<String, async_channel::Sender<MemConnection>>>>,
}

impl MemNetwork {
    /// Empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `address`, replacing any previous listener.
    pub fn bind(&self, address: impl Into<String>) -> MemListener {
        let (tx, incoming) = async_channel::unbounded();
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).insert(address.into(), tx);
        MemListener { incoming }
    }

    /// Transport dialing into this network.
    pub fn transport(&self) -> MemTransport {
        MemTransport {
            network: self.clone(),
            dialed: Arc::new(Mutex::new(Vec::new())),
            faults: Arc::new(Faults::default()),
        }
    }

    fn connect(
        &self,
        address: &str,
        headers: &[(String, String)],
    ) -> Result<MemConnection, TransportError> {
        let refused = || TransportError::Dial {
            address: address.to_owned(),
            reason: "connection refused".to_owned(),
        };
        let listener = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(refused)?;

        let (dialer, acceptor) = pair_with_headers(headers.to_vec());
        listener.try_send(acceptor).map_err(|_| refused())?;
        Ok(dialer)
    }
}

/// Dials a [`MemNetwork`] and remembers every connection it produced.
///
/// Every dialed connection shares the transport's [`Faults`].
#[derive(Clone)]
pub struct MemTransport {
    network: MemNetwork,
    dialed: Arc<Mutex<Vec<Arc<ConnStats>>>>,
    faults: Arc<Faults>,
}

impl MemTransport {
    /// Statistics of every connection dialed so far, oldest first.
    pub fn dialed(&self) -> Vec<Arc<ConnStats>> {
        self.dialed.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Faults shared by every connection this transport dials.
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }
}

#[async_trait]
impl Transport for MemTransport {
    type Connection = MemConnection;

    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<MemConnection, TransportError> {
        let mut conn = self.network.connect(address, &options.headers)?;
        conn.faults = Arc::clone(&self.faults);
        self.dialed.lock().unwrap_or_else(PoisonError::into_inner).push(conn.stats());
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn messages_arrive_in_order() {
        let (a, b) = pair();
        for n in 0u8..5 {
            a.write(MessageKind::Binary, Bytes::from(vec![n])).await.unwrap();
        }
        for n in 0u8..5 {
            let (_, data) = b.read().await.unwrap();
            assert_eq!(&data[..], &[n]);
        }
        assert_eq!(a.stats().writes(), 5);
    }

    #[tokio::test]
    async fn close_reaches_peer_with_code() {
        let (a, b) = pair();
        a.close(CloseCode::NORMAL, "done").await.unwrap();

        assert!(matches!(b.read().await, Err(TransportError::Closed)));
        assert_eq!(b.stats().peer_close(), Some((CloseCode::NORMAL, "done".to_owned())));
        a.close(CloseCode::NORMAL, "again").await.unwrap();
        assert_eq!(a.stats().closes(), 1);
    }

    #[tokio::test]
    async fn stalled_close_hangs_until_released() {
        let (a, b) = pair();
        a.faults().stall_close(true);
        let stalled =
            tokio::time::timeout(Duration::from_millis(20), a.close(CloseCode::NORMAL, "")).await;
        assert!(stalled.is_err());
        assert_eq!(a.stats().closes(), 0);

        a.faults().stall_close(false);
        a.close(CloseCode::NORMAL, "").await.unwrap();
        assert!(matches!(b.read().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn abort_fails_peer_read_with_io_error() {
        let (a, b) = pair();
        a.abort();
        assert!(matches!(b.read().await, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn dial_without_listener_is_refused() {
        let network = MemNetwork::new();
        let err = network.transport().dial("mem://nowhere", &DialOptions::default()).await;
        assert!(matches!(err, Err(TransportError::Dial { .. })));
    }

    #[tokio::test]
    async fn listener_sees_dial_headers() {
        let network = MemNetwork::new();
        let listener = network.bind("mem://server");
        let options = DialOptions {
            headers: vec![("X-Token".to_owned(), "abc".to_owned())],
            ..DialOptions::default()
        };
        let transport = network.transport();
        let _dialer = transport.dial("mem://server", &options).await.unwrap();

        let accepted = listener.accept().await.unwrap();
        assert_eq!(accepted.headers(), &[("X-Token".to_owned(), "abc".to_owned())]);
        assert_eq!(transport.dialed().len(), 1);
    }
}
