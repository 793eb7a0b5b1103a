//! Property tests for event delivery over the in-memory transport.
//!
//! With a single dispatch worker, events reach handlers exactly once and in
//! the order the peer sent them, whatever the mix of names and payloads.

use std::sync::{Arc, Mutex};

use etp_client::{Bytes, Client, ClientConfig};
use etp_harness::{MemNetwork, accept_client};
use proptest::prelude::*;

const ADDRESS: &str = "mem://server";

fn event_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("alpha".to_owned()),
        Just("beta".to_owned()),
        "[a-z]{1,12}".prop_filter("reserved for the barrier", |name| name != "sync"),
    ]
}

fn deliver(events: &[(String, Vec<u8>)]) -> Vec<(String, Vec<u8>)> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(async {
        let network = MemNetwork::new();
        let listener = network.bind(ADDRESS);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let client = Client::new(network.transport(), ClientConfig::default().with_workers(1));
        let log = Arc::clone(&seen);
        client
            .on_default(move |event, payload| {
                log.lock().unwrap().push((event.to_owned(), payload.to_vec()));
            })
            .on_with_ack("sync", |_| Bytes::new());
        client.dial(ADDRESS).await.unwrap();

        let conn = listener.accept().await.unwrap();
        let peer = accept_client(conn, ClientConfig::default(), |_| {}).await.unwrap();
        for (event, payload) in events {
            peer.emit(event, payload).await.unwrap();
        }
        peer.emit_with_ack("sync", b"").await.unwrap();

        client.close().await.unwrap();
        seen.lock().unwrap().clone()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn single_worker_preserves_order(
        events in prop::collection::vec(
            (event_name(), prop::collection::vec(any::<u8>(), 0..64)),
            0..40,
        )
    ) {
        let delivered = deliver(&events);
        prop_assert_eq!(delivered, events);
    }
}
