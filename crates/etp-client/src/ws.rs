//! WebSocket transport over `tokio-tungstenite`.
//!
//! [`WsTransport`] dials `ws://` URLs; [`WsConnection`] wraps any established
//! [`WebSocketStream`], so servers and simulated networks reuse the same
//! adapter after their own handshake.
//!
//! A configured read limit goes into tungstenite's [`WebSocketConfig`], so
//! oversized messages are rejected before they are buffered.
//!
//! The stream is split: writers share the sink, the single reader owns the
//! stream half. Pings carry a sequence number and resolve when the reader
//! observes the matching pong.

use std::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use etp_core::{CloseCode, DialOptions, MessageKind, Transport, TransportConnection, TransportError};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::{Mutex, watch},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async_with_config,
    tungstenite::{
        self, Message,
        client::IntoClientRequest,
        error::CapacityError,
        handshake::client::Request,
        http::{HeaderName, HeaderValue},
        protocol::{CloseFrame, WebSocketConfig, frame::coding::CloseCode as WsCloseCode},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound on sending the close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Dials WebSocket endpoints.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    type Connection = WsConnection<MaybeTlsStream<TcpStream>>;

    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Self::Connection, TransportError> {
        let request = build_request(address, &options.headers)?;
        let handshake = connect_async_with_config(request, ws_config(options.read_limit), false);
        let result = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| TransportError::Timeout(limit))?,
            None => handshake.await,
        };

        let (stream, response) = result.map_err(|err| dial_error(address, &err))?;
        debug!(address, status = %response.status(), "websocket handshake complete");
        Ok(WsConnection::new(stream))
    }
}

/// Build the opening handshake request for `address` with extra headers.
///
/// # Errors
///
/// [`TransportError::Dial`] for an invalid URL or header.
pub fn build_request(
    address: &str,
    headers: &[(String, String)],
) -> Result<Request, TransportError> {
    let mut request = address.into_client_request().map_err(|err| dial_error(address, &err))?;
    for (name, value) in headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| dial_error(address, &format!("invalid header name {name}: {err}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|err| dial_error(address, &format!("invalid value for {name}: {err}")))?;
        request.headers_mut().append(header, value);
    }
    Ok(request)
}

/// Protocol settings bounding inbound messages and frames to `read_limit`
/// bytes. `None` (tungstenite's defaults) when the limit is 0.
pub fn ws_config(read_limit: usize) -> Option<WebSocketConfig> {
    if read_limit == 0 {
        return None;
    }
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(read_limit);
    config.max_frame_size = Some(read_limit);
    Some(config)
}

fn dial_error(address: &str, reason: &dyn std::fmt::Display) -> TransportError {
    TransportError::Dial { address: address.to_owned(), reason: reason.to_string() }
}

/// An established WebSocket connection.
pub struct WsConnection<S> {
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: Mutex<SplitStream<WebSocketStream<S>>>,
    read_limit: AtomicUsize,
    pings: AtomicU64,
    pongs: watch::Sender<u64>,
    closed: CancellationToken,
}

impl<S> WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a stream that completed its opening handshake.
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (sink, stream) = stream.split();
        let (pongs, _) = watch::channel(0);
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            read_limit: AtomicUsize::new(0),
            pings: AtomicU64::new(0),
            pongs,
            closed: CancellationToken::new(),
        }
    }

    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.sink.lock().await.send(message).await.map_err(map_ws_error)
    }

    fn check_limit(&self, data: Bytes) -> Result<Bytes, TransportError> {
        let limit = self.read_limit.load(Ordering::Relaxed);
        if limit != 0 && data.len() > limit {
            return Err(TransportError::ReadLimitExceeded { size: data.len(), limit });
        }
        Ok(data)
    }

    fn record_pong(&self, data: &[u8]) {
        let Ok(seq) = <[u8; 8]>::try_from(data).map(u64::from_be_bytes) else {
            debug!(len = data.len(), "ignoring unsolicited pong");
            return;
        };
        self.pongs.send_if_modified(|last| {
            if seq > *last {
                *last = seq;
                true
            } else {
                false
            }
        });
    }
}

#[async_trait]
impl<S> TransportConnection for WsConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&self, kind: MessageKind, data: Bytes) -> Result<(), TransportError> {
        let message = match kind {
            MessageKind::Binary => Message::Binary(data),
            MessageKind::Text => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|err| TransportError::Protocol(err.to_string()))?;
                Message::Text(text.into())
            },
        };
        self.send(message).await
    }

    async fn read(&self) -> Result<(MessageKind, Bytes), TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let message = tokio::select! {
                biased;
                () = self.closed.cancelled() => return Err(TransportError::Closed),
                message = stream.next() => message,
            };

            match message {
                Some(Ok(Message::Binary(data))) => {
                    return Ok((MessageKind::Binary, self.check_limit(data)?));
                },
                Some(Ok(Message::Text(text))) => {
                    let data = Bytes::copy_from_slice(text.as_bytes());
                    return Ok((MessageKind::Text, self.check_limit(data)?));
                },
                Some(Ok(Message::Pong(data))) => self.record_pong(&data),
                Some(Ok(Message::Ping(_) | Message::Frame(_))) => {},
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "peer closed websocket");
                    self.closed.cancel();
                    return Err(TransportError::Closed);
                },
                Some(Err(err)) => return Err(map_ws_error(err)),
                None => {
                    self.closed.cancel();
                    return Err(TransportError::Closed);
                },
            }
        }
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        let frame =
            CloseFrame { code: WsCloseCode::from(code.0), reason: reason.to_owned().into() };
        let outcome = {
            let mut sink = self.sink.lock().await;
            tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(Some(frame)))).await
        };
        self.closed.cancel();

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => match map_ws_error(err) {
                TransportError::Closed => Ok(()),
                err => Err(err),
            },
            Err(_) => Err(TransportError::Timeout(CLOSE_TIMEOUT)),
        }
    }

    async fn ping(&self) -> Result<(), TransportError> {
        let seq = self.pings.fetch_add(1, Ordering::Relaxed) + 1;
        let mut pongs = self.pongs.subscribe();
        self.send(Message::Ping(Bytes::copy_from_slice(&seq.to_be_bytes()))).await?;

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(TransportError::Closed),
            seen = pongs.wait_for(|last| *last >= seq) => {
                seen.map(|_| ()).map_err(|_| TransportError::Closed)
            },
        }
    }

    fn set_read_limit(&self, limit: usize) {
        self.read_limit.store(limit, Ordering::Relaxed);
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            TransportError::Closed
        },
        tungstenite::Error::Io(err) => TransportError::Io(err),
        tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            TransportError::ReadLimitExceeded { size, limit: max_size }
        },
        other => TransportError::Protocol(other.to_string()),
    }
}
