//! WebSocket over turmoil's simulated network.
//!
//! Runs the production [`WsConnection`] adapter on top of turmoil TCP streams,
//! so connection lifecycle tests get deterministic latency, partitions and
//! host crashes. Must be used from inside a turmoil host or client.

use async_trait::async_trait;
use etp_client::ws::{WsConnection, build_request, ws_config};
use etp_core::{DialOptions, Transport, TransportError};
use tokio_tungstenite::{accept_async, client_async_with_config};
use tracing::debug;
use turmoil::net::{TcpListener, TcpStream};

/// Default port when a `ws://` URL omits one.
const DEFAULT_PORT: u16 = 80;

/// Dials `ws://host:port/path` URLs over turmoil TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimWsTransport;

#[async_trait]
impl Transport for SimWsTransport {
    type Connection = WsConnection<TcpStream>;

    async fn dial(
        &self,
        address: &str,
        options: &DialOptions,
    ) -> Result<Self::Connection, TransportError> {
        let dial_error = |reason: String| TransportError::Dial {
            address: address.to_owned(),
            reason,
        };

        let request = build_request(address, &options.headers)?;
        let host = request.uri().host().ok_or_else(|| dial_error("missing host".to_owned()))?;
        let authority = format!("{host}:{}", request.uri().port_u16().unwrap_or(DEFAULT_PORT));

        let handshake = async {
            let stream =
                TcpStream::connect(authority).await.map_err(|err| dial_error(err.to_string()))?;
            client_async_with_config(request, stream, ws_config(options.read_limit))
                .await
                .map_err(|err| dial_error(err.to_string()))
        };
        let (stream, _response) = match options.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| TransportError::Timeout(limit))??,
            None => handshake.await?,
        };

        debug!(address, "simulated websocket connected");
        Ok(WsConnection::new(stream))
    }
}

/// Accepts WebSocket connections on a simulated host.
pub struct SimWsListener {
    listener: TcpListener,
}

impl SimWsListener {
    /// Bind to `address` (e.g. `0.0.0.0:9000`) on the current host.
    pub async fn bind(address: &str) -> std::io::Result<Self> {
        Ok(Self { listener: TcpListener::bind(address).await? })
    }

    /// Accept the next connection and complete its handshake.
    pub async fn accept(&self) -> Result<WsConnection<TcpStream>, TransportError> {
        let (stream, peer) = self.listener.accept().await?;
        let stream = accept_async(stream)
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))?;
        debug!(%peer, "simulated websocket accepted");
        Ok(WsConnection::new(stream))
    }
}
