//! Blocking AMQP 0-9-1 client.
//!
//! amqpwire speaks the AMQP 0-9-1 wire protocol over any already-connected duplex
//! byte stream: frame codec, connection handshake and heartbeats, channel
//! multiplexing, consumers and publisher confirms.
//!
//! # Crate Structure
//!
//! - [`transport`]: the byte stream abstraction (TCP, Unix sockets)
//! - [`frame`]: frames, methods, content properties and field tables
//! - [`client`]: connections, channels, deliveries and confirms
//! - [`logging`]: stderr `tracing` subscriber setup (behind `logging` feature)
//!
//! The client types are also re-exported at the crate root.

/// Re-export transport types.
pub mod transport {
    pub use amqpwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use amqpwire_frame::*;
}

/// Re-export client types.
pub mod client {
    pub use amqpwire_client::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use amqpwire_client::{
    AmqpError, CancelToken, Channel, Connection, ConnectionConfig, Consumer, Credentials,
    Delivery, Error, Publishing, Result,
};
pub use amqpwire_transport::Transport;
