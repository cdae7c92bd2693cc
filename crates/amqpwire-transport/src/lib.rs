//! Duplex byte-stream abstraction for amqpwire.
//!
//! The connection never dials, resolves or negotiates TLS itself. It is handed an
//! already-established, ordered, reliable stream and needs three things from it
//! beyond `Read + Write`:
//! - a second handle to the same stream, so one thread can read while others write
//! - a way to shut the stream down from any thread, to unblock the reader on teardown
//! - per-direction timeouts, used while the handshake runs
//!
//! This is the lowest layer of amqpwire. Everything else builds on top of
//! the [`Transport`] trait provided here.

pub mod error;
pub mod traits;

pub use error::{Result, TransportError};
pub use traits::{BoxedTransport, Transport};
