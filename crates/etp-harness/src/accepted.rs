//! Client over an already-accepted connection.
//!
//! The protocol is symmetric, so the accepting side of a test runs the same
//! [`Client`] as the dialing side. [`AcceptedTransport`] hands out its
//! connection on the first dial and refuses afterwards.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use etp_client::{Client, ClientConfig, EtpError};
use etp_core::{DialOptions, Transport, TransportConnection, TransportError};

/// Transport whose single connection already exists.
pub struct AcceptedTransport<C> {
    pending: Mutex<Option<C>>,
}

impl<C> AcceptedTransport<C> {
    /// Wrap an accepted connection.
    pub fn new(conn: C) -> Self {
        Self { pending: Mutex::new(Some(conn)) }
    }
}

#[async_trait]
impl<C: TransportConnection> Transport for AcceptedTransport<C> {
    type Connection = C;

    async fn dial(&self, address: &str, _options: &DialOptions) -> Result<C, TransportError> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).take().ok_or_else(|| {
            TransportError::Dial {
                address: address.to_owned(),
                reason: "accepted connection already in use".to_owned(),
            }
        })
    }
}

/// Start a client on an accepted connection.
///
/// `configure` registers handlers before the read loop starts, so no
/// inbound event is missed.
pub async fn accept_client<C, F>(
    conn: C,
    config: ClientConfig,
    configure: F,
) -> Result<Client<AcceptedTransport<C>>, EtpError>
where
    C: TransportConnection,
    F: FnOnce(&Client<AcceptedTransport<C>>),
{
    let client = Client::new(AcceptedTransport::new(conn), config);
    configure(&client);
    client.dial("accepted").await?;
    Ok(client)
}
