use std::io::{ErrorKind, Write};
use std::time::{Duration, Instant};

use amqpwire_frame::method::{ConnectionOpen, ConnectionSecureOk, ConnectionStart, ConnectionStartOk};
use amqpwire_frame::{FieldTable, Frame, FrameError, FrameReader, FrameWriter, Method};
use amqpwire_transport::Transport;
use bytes::Bytes;
use tracing::debug;

use crate::config::{ConnectionConfig, Tuning};
use crate::error::{AmqpError, Error, Result};

/// What the server told us while the connection was being opened.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    pub(crate) tuning: Tuning,
    pub(crate) server_properties: FieldTable,
    pub(crate) mechanisms: Vec<String>,
    pub(crate) locales: Vec<String>,
}

/// Run the client side of connection setup: protocol header, start, tune, open.
///
/// The whole exchange is bounded by `config.handshake_timeout`; each read gets
/// whatever is left of it as the transport read timeout.
pub(crate) fn handshake_client<R: Transport, W: Write>(
    reader: &mut FrameReader<R>,
    writer: &mut FrameWriter<W>,
    config: &ConnectionConfig,
) -> Result<Negotiated> {
    let deadline = Instant::now() + config.handshake_timeout;
    let mut handshake = Handshake {
        reader,
        writer,
        deadline,
        timeout: config.handshake_timeout,
    };

    handshake.writer.write_protocol_header()?;

    let start = match handshake.recv()? {
        Method::ConnectionStart(start) => start,
        other => return Err(unexpected("connection.start", &other)),
    };
    check_version(&start)?;

    let mechanisms = split_words(&start.mechanisms);
    let locales = split_words(&start.locales);
    let mechanism = &config.credentials.mechanism;
    if !mechanisms.iter().any(|offered| offered == mechanism) {
        return Err(Error::Handshake(format!(
            "server does not offer mechanism {mechanism} (offered: {})",
            mechanisms.join(" ")
        )));
    }
    let locale = if locales.iter().any(|offered| *offered == config.locale) {
        config.locale.clone()
    } else {
        locales
            .first()
            .cloned()
            .unwrap_or_else(|| config.locale.clone())
    };

    handshake.send(Method::ConnectionStartOk(ConnectionStartOk {
        client_properties: config.client_properties.clone(),
        mechanism: mechanism.clone(),
        response: Bytes::copy_from_slice(&config.credentials.response),
        locale,
    }))?;

    let server_tune = loop {
        match handshake.recv()? {
            Method::ConnectionSecure(_) => {
                handshake.send(Method::ConnectionSecureOk(ConnectionSecureOk {
                    response: Bytes::copy_from_slice(&config.credentials.response),
                }))?;
            }
            Method::ConnectionTune(tune) => break tune,
            other => return Err(unexpected("connection.tune", &other)),
        }
    };

    let tuning = Tuning::negotiate(config.proposed(), server_tune);
    debug!(
        channel_max = tuning.channel_max,
        frame_max = tuning.frame_max,
        heartbeat_secs = tuning.heartbeat.as_secs(),
        "connection tuned"
    );
    handshake.send(Method::ConnectionTuneOk(tuning.to_tune()))?;
    handshake.send(Method::ConnectionOpen(ConnectionOpen {
        virtual_host: config.vhost.clone(),
    }))?;

    match handshake.recv()? {
        Method::ConnectionOpenOk => {}
        other => return Err(unexpected("connection.open-ok", &other)),
    }

    Ok(Negotiated {
        tuning,
        server_properties: start.server_properties,
        mechanisms,
        locales,
    })
}

struct Handshake<'a, R, W> {
    reader: &'a mut FrameReader<R>,
    writer: &'a mut FrameWriter<W>,
    deadline: Instant,
    timeout: Duration,
}

impl<R: Transport, W: Write> Handshake<'_, R, W> {
    fn send(&mut self, method: Method) -> Result<()> {
        self.writer.write_frame(&Frame::method(0, method))?;
        Ok(())
    }

    /// Next connection-level method. A server `connection.close` is answered and
    /// returned as an error.
    fn recv(&mut self) -> Result<Method> {
        loop {
            let remaining = self.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.timed_out());
            }
            self.reader.set_read_timeout(Some(remaining))?;

            match self.reader.read_frame() {
                Ok(Frame::Heartbeat) => continue,
                Ok(Frame::Method {
                    channel: 0,
                    method: Method::ConnectionClose(close),
                }) => {
                    self.send(Method::ConnectionCloseOk)?;
                    return Err(Error::ConnectionClosed(Some(AmqpError::from_server(&close))));
                }
                Ok(Frame::Method { channel: 0, method }) => return Ok(method),
                Ok(frame) => {
                    return Err(Error::UnexpectedFrame(format!(
                        "frame type {} on channel {} during handshake",
                        frame.frame_type(),
                        frame.channel()
                    )))
                }
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    return Err(self.timed_out())
                }
                Err(FrameError::ConnectionClosed | FrameError::Truncated { .. }) => {
                    return Err(Error::Handshake(
                        "connection closed during handshake".to_string(),
                    ))
                }
                Err(FrameError::ProtocolHeader {
                    major,
                    minor,
                    revision,
                }) => {
                    return Err(Error::Handshake(format!(
                        "server does not support AMQP 0-9-1 (offered AMQP {major}-{minor}-{revision})"
                    )))
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn timed_out(&self) -> Error {
        Error::Handshake(format!("timed out after {:?}", self.timeout))
    }
}

fn check_version(start: &ConnectionStart) -> Result<()> {
    if (start.version_major, start.version_minor) != (0, 9) {
        return Err(Error::Handshake(format!(
            "server does not support AMQP 0-9-1 (offered AMQP {}-{})",
            start.version_major, start.version_minor
        )));
    }
    Ok(())
}

fn split_words(raw: &Bytes) -> Vec<String> {
    String::from_utf8_lossy(raw)
        .split_ascii_whitespace()
        .map(str::to_string)
        .collect()
}

fn unexpected(expected: &str, got: &Method) -> Error {
    Error::UnexpectedFrame(format!("expected {expected}, got method {}", got.id()))
}
