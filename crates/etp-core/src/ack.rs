//! Ack correlator: matches replies to pending requests.
//!
//! `emit_with_ack` registers its correlation id here before writing the
//! request, then waits on the returned [`AckWaiter`]. The read loop resolves
//! entries as acknowledgement frames arrive.
//!
//! # Invariants
//!
//! - At most one resolution is delivered per id: [`AckCorrelator::resolve`]
//!   removes the entry under the lock before sending, so late or duplicate
//!   acks find nothing.
//! - Every [`AckWaiter`] ends in exactly one outcome: the reply,
//!   [`AckError::Canceled`], or [`AckError::ConnectionClosed`].
//! - The entry is gone from the map by the time `wait` returns, and also when
//!   a waiter is dropped without being awaited.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::AckError;

/// Pending acknowledgements keyed by correlation id.
#[derive(Debug, Default)]
pub struct AckCorrelator {
    pending: Mutex<HashMap<u64, oneshot::Sender<Bytes>>>,
}

impl AckCorrelator {
    /// Create an empty correlator.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pending request.
    ///
    /// The returned waiter fails with [`AckError::Canceled`] when `cancel`
    /// fires and with [`AckError::ConnectionClosed`] when `closed` fires.
    pub fn register(
        self: &Arc<Self>,
        id: u64,
        cancel: CancellationToken,
        closed: CancellationToken,
    ) -> Result<AckWaiter, AckError> {
        let (tx, rx) = oneshot::channel();
        match self.lock().entry(id) {
            Entry::Occupied(_) => return Err(AckError::DuplicateId(id)),
            Entry::Vacant(slot) => {
                slot.insert(tx);
            },
        }

        Ok(AckWaiter { id, rx, cancel, closed, correlator: Arc::downgrade(self) })
    }

    /// Deliver `payload` to the waiter registered under `id`.
    ///
    /// Returns `false` if no entry exists (late or duplicate ack, or the
    /// waiter already gave up). Not an error.
    pub fn resolve(&self, id: u64, payload: Bytes) -> bool {
        let Some(tx) = self.lock().remove(&id) else {
            return false;
        };
        tx.send(payload).is_ok()
    }

    /// Remove the entry for `id` without resolving it.
    pub fn unregister(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Bytes>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one pending acknowledgement.
#[derive(Debug)]
pub struct AckWaiter {
    id: u64,
    rx: oneshot::Receiver<Bytes>,
    cancel: CancellationToken,
    closed: CancellationToken,
    correlator: Weak<AckCorrelator>,
}

impl AckWaiter {
    /// Correlation id this waiter is registered under.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply, cancellation, or connection close.
    ///
    /// A reply that is already delivered wins over a simultaneous
    /// cancellation or close.
    pub async fn wait(mut self) -> Result<Bytes, AckError> {
        tokio::select! {
            biased;
            reply = &mut self.rx => reply.map_err(|_| AckError::ConnectionClosed),
            () = self.cancel.cancelled() => Err(AckError::Canceled),
            () = self.closed.cancelled() => Err(AckError::ConnectionClosed),
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.unregister(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use proptest::prelude::*;

    use super::*;

    fn tokens() -> (CancellationToken, CancellationToken) {
        (CancellationToken::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn resolve_delivers_payload() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(1, cancel, closed).unwrap();

        assert!(acks.resolve(1, Bytes::from_static(b"hi")));
        assert_eq!(waiter.wait().await, Ok(Bytes::from_static(b"hi")));
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn cancel_fails_with_canceled() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(1, cancel.clone(), closed).unwrap();

        cancel.cancel();
        assert_eq!(waiter.wait().await, Err(AckError::Canceled));
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn close_fails_with_connection_closed() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(1, cancel, closed.clone()).unwrap();

        let handle = tokio::spawn(waiter.wait());
        tokio::time::sleep(Duration::from_millis(10)).await;
        closed.cancel();

        assert_eq!(handle.await.unwrap(), Err(AckError::ConnectionClosed));
        assert_eq!(acks.pending_count(), 0);
    }

    #[tokio::test]
    async fn reply_wins_over_later_close() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(5, cancel, closed.clone()).unwrap();

        acks.resolve(5, Bytes::from_static(b"first"));
        closed.cancel();
        assert_eq!(waiter.wait().await, Ok(Bytes::from_static(b"first")));
    }

    #[test]
    fn unknown_id_is_ignored() {
        let acks = AckCorrelator::new();
        assert!(!acks.resolve(99, Bytes::new()));
    }

    #[tokio::test]
    async fn duplicate_ack_is_ignored() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(3, cancel, closed).unwrap();

        assert!(acks.resolve(3, Bytes::from_static(b"a")));
        assert!(!acks.resolve(3, Bytes::from_static(b"b")));
        assert_eq!(waiter.wait().await, Ok(Bytes::from_static(b"a")));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let _first = acks.register(4, cancel.clone(), closed.clone()).unwrap();

        let second = acks.register(4, cancel, closed);
        assert!(matches!(second, Err(AckError::DuplicateId(4))));
        assert_eq!(acks.pending_count(), 1);
    }

    #[test]
    fn dropped_waiter_unregisters() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(8, cancel, closed).unwrap();
        assert_eq!(acks.pending_count(), 1);

        drop(waiter);
        assert_eq!(acks.pending_count(), 0);
        assert!(!acks.resolve(8, Bytes::new()));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u64),
        Resolve(u64, u8),
        Unregister(u64),
        Cancel(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        let id = 1u64..6;
        prop_oneof![
            id.clone().prop_map(Op::Register),
            (id.clone(), any::<u8>()).prop_map(|(id, byte)| Op::Resolve(id, byte)),
            id.clone().prop_map(Op::Unregister),
            id.prop_map(Op::Cancel),
        ]
    }

    struct Tracked {
        waiter: AckWaiter,
        cancel: CancellationToken,
        settled: Option<Result<Bytes, AckError>>,
    }

    impl Tracked {
        fn expected(&self) -> Result<Bytes, AckError> {
            match &self.settled {
                Some(outcome) => outcome.clone(),
                None if self.cancel.is_cancelled() => Err(AckError::Canceled),
                None => Err(AckError::ConnectionClosed),
            }
        }
    }

    proptest! {
        #[test]
        fn every_waiter_sees_exactly_its_outcome(ops in prop::collection::vec(op(), 0..64)) {
            let acks = AckCorrelator::new();
            let closed = CancellationToken::new();
            let mut tracked: Vec<Tracked> = Vec::new();
            let mut pending: HashMap<u64, usize> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(id) => {
                        let cancel = CancellationToken::new();
                        let registered = acks.register(id, cancel.clone(), closed.clone());
                        if pending.contains_key(&id) {
                            prop_assert!(matches!(registered, Err(AckError::DuplicateId(dup)) if dup == id));
                        } else {
                            let waiter = registered.unwrap();
                            pending.insert(id, tracked.len());
                            tracked.push(Tracked { waiter, cancel, settled: None });
                        }
                    },
                    Op::Resolve(id, byte) => {
                        let payload = Bytes::from(vec![byte]);
                        let delivered = acks.resolve(id, payload.clone());
                        match pending.remove(&id) {
                            Some(index) => {
                                prop_assert!(delivered);
                                tracked[index].settled = Some(Ok(payload));
                            },
                            None => prop_assert!(!delivered),
                        }
                    },
                    Op::Unregister(id) => {
                        let removed = acks.unregister(id);
                        match pending.remove(&id) {
                            Some(index) => {
                                prop_assert!(removed);
                                tracked[index].settled = Some(Err(AckError::ConnectionClosed));
                            },
                            None => prop_assert!(!removed),
                        }
                    },
                    Op::Cancel(id) => {
                        if let Some(&index) = pending.get(&id) {
                            tracked[index].cancel.cancel();
                        }
                    },
                }
                prop_assert_eq!(acks.pending_count(), pending.len());
            }

            closed.cancel();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let outcomes = runtime.block_on(async {
                let mut outcomes = Vec::with_capacity(tracked.len());
                for entry in tracked {
                    let expected = entry.expected();
                    outcomes.push((entry.waiter.wait().await, expected));
                }
                outcomes
            });

            for (seen, expected) in outcomes {
                prop_assert_eq!(seen, expected);
            }
            prop_assert_eq!(acks.pending_count(), 0);
        }
    }

    #[tokio::test]
    async fn dropped_correlator_reports_closed() {
        let acks = AckCorrelator::new();
        let (cancel, closed) = tokens();
        let waiter = acks.register(2, cancel, closed).unwrap();

        drop(acks);
        assert_eq!(waiter.wait().await, Err(AckError::ConnectionClosed));
    }
}
