use std::io::{ErrorKind, Read};

use amqpwire_transport::Transport;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

/// Bytes requested from the stream per read call.
const READ_CHUNK: usize = 8 * 1024;

/// Blocking frame decoder over a `Read` stream.
///
/// Bytes that do not yet make a whole frame stay buffered across calls, so a
/// read that fails with a timeout can simply be retried.
pub struct FrameReader<T> {
    inner: T,
    pending: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            pending: BytesMut::with_capacity(READ_CHUNK),
            config,
        }
    }

    /// Block until one whole frame is available.
    ///
    /// EOF on a frame boundary is [`FrameError::ConnectionClosed`]; EOF inside
    /// a frame is [`FrameError::Truncated`].
    pub fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(frame) = decode_frame(&mut self.pending, self.config.max_frame_size)? {
                trace!(
                    channel = frame.channel(),
                    frame_type = frame.frame_type(),
                    "frame in"
                );
                return Ok(frame);
            }
            if self.fill()? == 0 {
                return Err(match self.pending.len() {
                    0 => FrameError::ConnectionClosed,
                    buffered => FrameError::Truncated { buffered },
                });
            }
        }
    }

    /// One read from the stream into `pending`; 0 means EOF.
    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the frame size limit, usually to the negotiated `frame-max`.
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.config.max_frame_size = max_frame_size;
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl<T: Transport> FrameReader<T> {
    /// Like [`with_config`](FrameReader::with_config), also applying
    /// `config.read_timeout` to the transport.
    pub fn with_config_transport(inner: T, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        Ok(Self::with_config(inner, config))
    }

    /// Change the transport's read timeout; `None` blocks indefinitely.
    pub fn set_read_timeout(&mut self, timeout: Option<std::time::Duration>) -> Result<()> {
        self.inner
            .set_read_timeout(timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        self.config.read_timeout = timeout;
        Ok(())
    }
}
