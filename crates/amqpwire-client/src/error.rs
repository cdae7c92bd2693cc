use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use amqpwire_frame::method::Close;
use amqpwire_frame::FrameError;
use amqpwire_transport::TransportError;

pub const REPLY_SUCCESS: u16 = 200;
pub const CONTENT_TOO_LARGE: u16 = 311;
pub const NO_ROUTE: u16 = 312;
pub const NO_CONSUMERS: u16 = 313;
pub const CONNECTION_FORCED: u16 = 320;
pub const INVALID_PATH: u16 = 402;
pub const ACCESS_REFUSED: u16 = 403;
pub const NOT_FOUND: u16 = 404;
pub const RESOURCE_LOCKED: u16 = 405;
pub const PRECONDITION_FAILED: u16 = 406;
pub const FRAME_ERROR: u16 = 501;
pub const SYNTAX_ERROR: u16 = 502;
pub const COMMAND_INVALID: u16 = 503;
pub const CHANNEL_ERROR: u16 = 504;
pub const UNEXPECTED_FRAME: u16 = 505;
pub const RESOURCE_ERROR: u16 = 506;
pub const NOT_ALLOWED: u16 = 530;
pub const NOT_IMPLEMENTED: u16 = 540;
pub const INTERNAL_ERROR: u16 = 541;

/// A structured close reason, raised by the server or by this client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmqpError {
    pub code: u16,
    pub text: String,
    /// The method that caused the close, or 0.
    pub class_id: u16,
    pub method_id: u16,
    /// Raised by the server rather than detected locally.
    pub server: bool,
    /// A soft error: only the channel is lost and a fresh one may be opened.
    pub recoverable: bool,
}

impl AmqpError {
    pub(crate) fn from_server(close: &Close) -> Self {
        Self {
            code: close.reply_code,
            text: close.reply_text.clone(),
            class_id: close.class_id,
            method_id: close.method_id,
            server: true,
            recoverable: is_soft(close.reply_code),
        }
    }

    pub(crate) fn local(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            class_id: 0,
            method_id: 0,
            server: false,
            recoverable: is_soft(code),
        }
    }

    pub(crate) fn to_close(&self) -> Close {
        Close {
            reply_code: self.code,
            reply_text: self.text.clone(),
            class_id: self.class_id,
            method_id: self.method_id,
        }
    }
}

fn is_soft(code: u16) -> bool {
    matches!(
        code,
        CONTENT_TOO_LARGE
            | NO_ROUTE
            | NO_CONSUMERS
            | ACCESS_REFUSED
            | NOT_FOUND
            | RESOURCE_LOCKED
            | PRECONDITION_FAILED
    )
}

impl fmt::Display for AmqpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = if self.server { "server" } else { "client" };
        write!(f, "{origin} reply {}: {}", self.code, self.text)?;
        if self.class_id != 0 || self.method_id != 0 {
            write!(f, " (method {}/{})", self.class_id, self.method_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for AmqpError {}

/// Errors surfaced by connections and channels.
///
/// Cloned to every waiter and observer when a connection or channel terminates.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(Arc<TransportError>),

    /// Frame-level error: I/O, framing or decode fault.
    #[error("frame error: {0}")]
    Frame(Arc<FrameError>),

    /// Handshake failed before the connection opened.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The connection is closed; carries the reason when the close was not graceful.
    #[error("connection closed{}", reason_suffix(.0))]
    ConnectionClosed(Option<AmqpError>),

    /// The channel is closed; carries the reason when the close was not graceful.
    #[error("channel {channel} closed{}", reason_suffix(.reason))]
    ChannelClosed {
        channel: u16,
        reason: Option<AmqpError>,
    },

    /// Every channel id the connection negotiated is in use.
    #[error("channel limit reached")]
    ChannelsExhausted,

    /// Arguments were rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No inbound traffic within twice the heartbeat interval.
    #[error("missed heartbeats from server")]
    MissedHeartbeats,

    /// The peer sent a frame the protocol state does not allow.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// The peer did not confirm a close within the grace period.
    #[error("close not confirmed within {0:?}")]
    CloseTimeout(Duration),

    /// The caller's cancel token fired.
    #[error("cancelled")]
    Cancelled,
}

fn reason_suffix(reason: &Option<AmqpError>) -> String {
    match reason {
        Some(err) => format!(": {err}"),
        None => String::new(),
    }
}

impl Error {
    /// The structured close reason, if this error carries one.
    pub fn amqp_error(&self) -> Option<&AmqpError> {
        match self {
            Error::ConnectionClosed(reason) | Error::ChannelClosed { reason, .. } => {
                reason.as_ref()
            }
            _ => None,
        }
    }

    /// Whether opening a new channel on the same connection is expected to work.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::ChannelClosed { reason, .. } => {
                reason.as_ref().is_none_or(|reason| reason.recoverable)
            }
            Error::ChannelsExhausted | Error::InvalidArgument(_) | Error::Cancelled => true,
            _ => false,
        }
    }

    /// A graceful close, as opposed to a fault.
    pub(crate) fn is_graceful(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed(None) | Error::ChannelClosed { reason: None, .. }
        )
    }
}

impl From<TransportError> for Error {
    fn from(err: TransportError) -> Self {
        Error::Transport(Arc::new(err))
    }
}

impl From<FrameError> for Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::InvalidValue(msg) => Error::InvalidArgument(msg),
            other => Error::Frame(Arc::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
