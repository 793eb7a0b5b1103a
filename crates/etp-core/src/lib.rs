//! ETP client engine core.
//!
//! Transport-agnostic building blocks of the event protocol client. Nothing
//! in this crate opens sockets; the connection lifecycle in `etp-client`
//! wires these pieces to a concrete [`transport::TransportConnection`].
//!
//! # Components
//!
//! - [`ack`]: Ack correlator (pending requests, one-shot resolution)
//! - [`dispatch`]: Fixed worker pool draining the inbound event queue
//! - [`registry`]: Event handlers and lifecycle hooks
//! - [`transport`]: Transport abstraction (duplex message stream)
//! - [`pool`]: Reusable encode buffers
//! - [`id`]: Correlation id generation
//! - [`error`]: Error taxonomy shared with callers and hooks

pub mod ack;
pub mod dispatch;
pub mod error;
pub mod id;
pub mod pool;
pub mod registry;
pub mod transport;

pub use ack::{AckCorrelator, AckWaiter};
pub use dispatch::{AckSink, DispatchPool, InboundEvent};
pub use error::{AckError, EtpError, TransportError};
pub use id::{IdGenerator, SequentialIdGenerator};
pub use pool::{BufferPool, PooledBuf};
pub use registry::HandlerRegistry;
pub use transport::{CloseCode, DialOptions, MessageKind, Transport, TransportConnection};
