//! AMQP 0-9-1 connection and channel engine.
//!
//! A [`Connection`] takes an already-established [`Transport`], runs the
//! handshake and multiplexes [`Channel`]s over it. One reader thread decodes
//! inbound frames and routes them by channel id; every outbound frame goes
//! through a single writer lock, so multi-frame publishes stay contiguous on
//! the wire. Synchronous channel calls block their caller, never the reader.
//!
//! Asynchronous traffic (deliveries, returns, confirms, cancellations, flow
//! changes and close notifications) is exposed as crossbeam receivers that end
//! when the channel or connection terminates.
//!
//! [`Transport`]: amqpwire_transport::Transport

pub mod allocator;
pub mod cancel;
pub mod channel;
pub mod config;
pub mod connection;
pub mod delivery;
pub mod error;

mod handshake;
mod heartbeat;
mod sync;
mod tracker;

pub use allocator::Allocator;
pub use cancel::CancelToken;
pub use channel::Channel;
pub use config::{
    default_client_properties, ConnectionConfig, Credentials, Tuning, DEFAULT_CHANNEL_MAX,
    DEFAULT_HEARTBEAT, DEFAULT_LOCALE,
};
pub use connection::Connection;
pub use delivery::{
    Blocking, Confirmation, Consumer, Delivery, GetMessage, PublishConfirm, Publishing, Return,
};
pub use error::{AmqpError, Error, Result};
