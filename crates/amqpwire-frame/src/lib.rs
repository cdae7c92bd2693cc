//! AMQP 0-9-1 frame codec.
//!
//! Every frame on the wire is:
//! - a 1-byte frame type (method, content header, content body, heartbeat)
//! - a 2-byte big-endian channel id, 0 for connection-level traffic
//! - a 4-byte big-endian payload length, then the payload
//! - the `0xCE` frame-end marker
//!
//! Method payloads are decoded against the fixed 0-9-1 schema in [`method`].
//! Field tables, the recursive typed key/value structure carried by method
//! arguments and message headers, live in [`field`].

#[cfg(any(test, feature = "arbitrary"))]
pub mod arbitrary;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod field;
pub mod method;
pub mod properties;
pub mod reader;
pub mod writer;

pub use codec::{
    body_frames, decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_FRAME_MAX, FRAME_END,
    FRAME_HEADER_SIZE, FRAME_MIN_SIZE, FRAME_OVERHEAD, PROTOCOL_HEADER,
};
pub use error::{FrameError, Result};
pub use field::{Decimal, FieldTable, FieldValue};
pub use method::{Method, MethodId};
pub use properties::{BasicProperties, ContentHeader, PERSISTENT, TRANSIENT};
pub use reader::FrameReader;
pub use writer::FrameWriter;
