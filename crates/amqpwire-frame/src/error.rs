/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The byte after the payload is not the frame-end marker.
    #[error("invalid frame end marker 0x{0:02x} (expected 0xce)")]
    BadFrameEnd(u8),

    /// The frame header carries a type this codec does not know.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// The peer answered with its own protocol header instead of a frame.
    #[error("peer sent protocol header AMQP {major}-{minor}-{revision}")]
    ProtocolHeader { major: u8, minor: u8, revision: u8 },

    /// The payload exceeds the negotiated maximum frame size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The payload length is inconsistent with what the payload contains.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// A field table carries a value type tag this codec does not know.
    #[error("unknown field value type tag 0x{0:02x}")]
    UnknownFieldType(u8),

    /// The class/method pair is not part of the AMQP 0-9-1 schema.
    #[error("unknown method {class_id}/{method_id}")]
    UnknownMethod { class_id: u16, method_id: u16 },

    /// A short string or field-table key is not valid UTF-8.
    #[error("invalid utf-8 in string field")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A value cannot be represented on the wire; nothing was sent.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The stream ended in the middle of a frame.
    #[error("stream truncated mid-frame ({buffered} bytes buffered)")]
    Truncated { buffered: usize },

    /// The peer closed the stream on a frame boundary.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// The frame envelope itself is broken: end marker, type, length or size.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            FrameError::BadFrameEnd(_)
                | FrameError::UnknownFrameType(_)
                | FrameError::ProtocolHeader { .. }
                | FrameError::FrameTooLarge { .. }
                | FrameError::Malformed(_)
        )
    }

    /// The envelope was fine but its contents could not be decoded.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownFieldType(_)
                | FrameError::UnknownMethod { .. }
                | FrameError::InvalidUtf8(_)
        )
    }

    pub(crate) fn short(what: &str, need: usize, have: usize) -> Self {
        FrameError::Malformed(format!("{what}: need {need} bytes, {have} left"))
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
