//! Subcommand tests against an in-memory peer.

use std::{future::pending, time::Duration};

use etp_cli::{CliError, commands};
use etp_client::{Bytes, Client, ClientConfig, EtpError};
use etp_harness::{MemNetwork, accept_client};

const ADDRESS: &str = "mem://server";

#[tokio::test]
async fn emit_with_ack_prints_reply() {
    let network = MemNetwork::new();
    let listener = network.bind(ADDRESS);
    let client = Client::new(network.transport(), ClientConfig::default());
    let mut out = Vec::new();

    let peer = async {
        let conn = listener.accept().await.unwrap();
        accept_client(conn, ClientConfig::default(), |peer| {
            peer.on_with_ack("shout", |payload| Bytes::from(payload.to_ascii_uppercase()));
        })
        .await
        .unwrap()
    };
    let (result, _peer) = tokio::join!(
        commands::emit(&client, ADDRESS, "shout", b"hi", Some(Duration::from_secs(1)), &mut out),
        peer,
    );

    result.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "HI\n");
    assert!(client.closed());
}

#[tokio::test]
async fn emit_without_ack_prints_nothing() {
    let network = MemNetwork::new();
    let listener = network.bind(ADDRESS);
    let client = Client::new(network.transport(), ClientConfig::default());
    let mut out = Vec::new();

    let (result, conn) = tokio::join!(
        commands::emit(&client, ADDRESS, "note", b"", None, &mut out),
        listener.accept(),
    );

    result.unwrap();
    assert!(out.is_empty());
    assert!(conn.is_some());
}

#[tokio::test]
async fn unanswered_ack_times_out() {
    let network = MemNetwork::new();
    let _listener = network.bind(ADDRESS);
    let client = Client::new(network.transport(), ClientConfig::default());
    let mut out = Vec::new();

    let wait = Some(Duration::from_millis(20));
    let err = commands::emit(&client, ADDRESS, "void", b"", wait, &mut out).await.unwrap_err();
    assert!(matches!(err, CliError::AckTimeout(_)));
}

#[tokio::test]
async fn ack_timeout_wins_over_close_failure() {
    let network = MemNetwork::new();
    let _listener = network.bind(ADDRESS);
    let transport = network.transport();
    transport.faults().fail_close(true);
    let client = Client::new(transport, ClientConfig::default());

    let wait = Some(Duration::from_millis(20));
    let err =
        commands::emit(&client, ADDRESS, "void", b"", wait, &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, CliError::AckTimeout(_)));
}

#[tokio::test]
async fn close_failure_is_reported_after_successful_emit() {
    let network = MemNetwork::new();
    let _listener = network.bind(ADDRESS);
    let transport = network.transport();
    transport.faults().fail_close(true);
    let client = Client::new(transport, ClientConfig::default());

    let err =
        commands::emit(&client, ADDRESS, "note", b"", None, &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, CliError::Client(EtpError::Close(_))));
}

#[tokio::test]
async fn emit_to_missing_endpoint_fails_to_dial() {
    let client = Client::new(MemNetwork::new().transport(), ClientConfig::default());
    let err = commands::emit(&client, ADDRESS, "x", b"", None, &mut Vec::new()).await.unwrap_err();
    assert!(matches!(err, CliError::Client(EtpError::Dial(_))));
}

#[tokio::test]
async fn listen_prints_events_until_peer_closes() {
    let network = MemNetwork::new();
    let listener = network.bind(ADDRESS);
    let client = Client::new(network.transport(), ClientConfig::default().with_workers(1));
    let mut out = Vec::new();

    let peer = async {
        let conn = listener.accept().await.unwrap();
        let peer = accept_client(conn, ClientConfig::default(), |_| {}).await.unwrap();
        peer.emit("greet", b"hello").await.unwrap();
        let reply = peer.emit_with_ack("echo", b"x").await.unwrap();
        assert_eq!(&reply[..], b"x");
        peer.emit("binary", [0xffu8, 0x00]).await.unwrap();
        peer.emit_with_ack("echo", b"sync").await.unwrap();
        peer.close().await.unwrap();
    };
    let ack_events = ["echo".to_owned()];
    let (result, ()) = tokio::join!(
        commands::listen(&client, ADDRESS, &[], &ack_events, &mut out, pending()),
        peer,
    );

    result.unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "greet hello\necho x\nbinary 0xff00\necho sync\n");
}

#[test]
fn render_falls_back_to_hex() {
    assert_eq!(commands::render(b"plain"), "plain");
    assert_eq!(commands::render(&[0xc3, 0x28]), "0xc328");
}
