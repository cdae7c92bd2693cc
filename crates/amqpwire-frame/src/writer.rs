use std::io::{ErrorKind, Write};

use amqpwire_transport::Transport;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig, PROTOCOL_HEADER};
use crate::error::{FrameError, Result};

/// Room for a method frame, a content header and a few small body frames.
const STAGING_CAPACITY: usize = 8 * 1024;

/// Blocking frame encoder over a `Write` stream.
///
/// Frames are staged in one buffer and handed to the stream together, so a
/// batch handed to [`write_frames`](Self::write_frames) is either written in
/// full or not started.
pub struct FrameWriter<T> {
    inner: T,
    staged: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            staged: BytesMut::with_capacity(STAGING_CAPACITY),
            config,
        }
    }

    /// Send the protocol header that opens a connection.
    pub fn write_protocol_header(&mut self) -> Result<()> {
        self.staged.clear();
        self.staged.extend_from_slice(&PROTOCOL_HEADER);
        self.drain_staged()
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_frames(std::slice::from_ref(frame))
    }

    /// Encode the whole batch, then write it. An encode or size error leaves
    /// the stream untouched.
    pub fn write_frames(&mut self, frames: &[Frame]) -> Result<()> {
        self.staged.clear();
        if let Err(err) = self.stage(frames) {
            self.staged.clear();
            return Err(err);
        }
        trace!(frames = frames.len(), bytes = self.staged.len(), "frames out");
        self.drain_staged()
    }

    fn stage(&mut self, frames: &[Frame]) -> Result<()> {
        let max = self.config.max_frame_size;
        for frame in frames {
            let start = self.staged.len();
            encode_frame(frame, &mut self.staged)?;
            let size = self.staged.len() - start;
            if max != 0 && size > max {
                return Err(FrameError::FrameTooLarge { size, max });
            }
        }
        Ok(())
    }

    fn drain_staged(&mut self) -> Result<()> {
        let mut pending = &self.staged[..];
        while !pending.is_empty() {
            match self.inner.write(pending) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(written) => pending = &pending[written..],
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        self.staged.clear();
        self.flush()
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                other => return other.map_err(FrameError::Io),
            }
        }
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

impl<T: Transport> FrameWriter<T> {
    /// Like [`with_config`](FrameWriter::with_config), also applying
    /// `config.write_timeout` to the transport.
    pub fn with_config_transport(inner: T, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(|err| FrameError::Io(err.into_io()))?;
        Ok(Self::with_config(inner, config))
    }
}
