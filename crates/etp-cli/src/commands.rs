//! Subcommand execution, generic over the transport.

use std::{future::Future, io::Write, time::Duration};

use etp_client::{Bytes, Client, Transport};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::CliError;

/// Dial `url`, send one event and close.
///
/// With `ack` set, waits up to that long for the acknowledgement and writes
/// its payload as one line. A failed send is reported ahead of a failed
/// close.
pub async fn emit<T: Transport>(
    client: &Client<T>,
    url: &str,
    event: &str,
    payload: &[u8],
    ack: Option<Duration>,
    out: &mut impl Write,
) -> Result<(), CliError> {
    client.dial(url).await?;

    let sent = match ack {
        Some(limit) => {
            match tokio::time::timeout(limit, client.emit_with_ack(event, payload)).await {
                Ok(Ok(reply)) => writeln!(out, "{}", render(&reply)).map_err(CliError::from),
                Ok(Err(err)) => Err(err.into()),
                Err(_) => Err(CliError::AckTimeout(limit)),
            }
        },
        None => client.emit(event, payload).await.map_err(CliError::from),
    };

    match (sent, client.close().await) {
        (Ok(()), closed) => closed.map_err(CliError::from),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(error = %close_err, "close after failed emit also failed");
            Err(err)
        },
    }
}

/// Dial `url` and write every received event as `<event> <payload>` until
/// `shutdown` resolves or the connection ends.
///
/// `events` restricts output to the named events; an empty list prints
/// everything. Events in `echo` are acknowledged with their own payload.
pub async fn listen<T: Transport>(
    client: &Client<T>,
    url: &str,
    events: &[String],
    echo: &[String],
    out: &mut impl Write,
    shutdown: impl Future<Output = ()>,
) -> Result<(), CliError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Bytes)>();

    if events.is_empty() {
        let tx = tx.clone();
        client.on_default(move |event, payload| {
            let _ = tx.send((event.to_owned(), payload));
        });
    }
    for event in events {
        let tx = tx.clone();
        let name = event.clone();
        client.on(event.clone(), move |payload| {
            let _ = tx.send((name.clone(), payload));
        });
    }
    for event in echo {
        let tx = tx.clone();
        let name = event.clone();
        client.on_with_ack(event.clone(), move |payload| {
            let _ = tx.send((name.clone(), payload.clone()));
            payload
        });
    }
    drop(tx);
    client.on_error(|err| warn!(error = %err, "listener error"));

    client.dial(url).await?;
    info!(url, "listening");

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                client.close().await?;
                break;
            },
            () = client.wait_closed() => break,
            Some((event, payload)) = rx.recv() => writeln!(out, "{event} {}", render(&payload))?,
        }
    }

    while let Ok((event, payload)) = rx.try_recv() {
        writeln!(out, "{event} {}", render(&payload))?;
    }
    Ok(())
}

/// UTF-8 payloads verbatim, anything else as `0x`-prefixed hex.
pub fn render(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_owned(),
        Err(_) => format!("0x{}", hex::encode(payload)),
    }
}
