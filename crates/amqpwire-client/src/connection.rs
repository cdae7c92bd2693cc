use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use amqpwire_frame::{FieldTable, Frame, FrameConfig, FrameError, FrameReader, FrameWriter, Method};
use amqpwire_transport::{BoxedTransport, Transport, TransportError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::allocator::Allocator;
use crate::cancel::CancelToken;
use crate::channel::{Channel, ChannelInner};
use crate::config::{ConnectionConfig, Tuning};
use crate::delivery::Blocking;
use crate::error::{AmqpError, Error, Result, REPLY_SUCCESS};
use crate::handshake::handshake_client;
use crate::heartbeat;
use crate::sync::Latch;

/// Live channels by id, plus the ids they hold.
pub(crate) struct ChannelTable {
    pub(crate) allocator: Allocator,
    pub(crate) map: HashMap<u16, Arc<ChannelInner>>,
}

/// State shared by the connection handle, its reader and heartbeat threads,
/// and (through a weak reference) its channels.
pub(crate) struct Inner {
    writer: Mutex<FrameWriter<BoxedTransport>>,
    shutdown: Mutex<BoxedTransport>,
    closing: AtomicBool,
    pub(crate) channels: Mutex<ChannelTable>,
    pub(crate) terminal: Latch<Error>,
    pub(crate) tuning: Tuning,
    pub(crate) close_timeout: Duration,
    pub(crate) last_sent: Mutex<Instant>,
    pub(crate) last_recv: Mutex<Instant>,
    close_listeners: Mutex<Vec<Sender<Error>>>,
    blocked_listeners: Mutex<Vec<Sender<Blocking>>>,
    server_properties: FieldTable,
    mechanisms: Vec<String>,
    locales: Vec<String>,
}

/// One AMQP 0-9-1 connection over an established transport.
///
/// A dedicated reader thread decodes every inbound frame and routes it to its
/// channel; all outbound frames go through one writer lock so a publish's
/// method, header and body frames are never interleaved with another
/// channel's traffic. Dropping the connection closes it.
pub struct Connection {
    inner: Arc<Inner>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Run the handshake over `transport` and start the connection's threads.
    ///
    /// The transport must be able to clone itself: one handle reads, one writes
    /// and one is kept to shut the stream down.
    pub fn open<T: Transport>(transport: T, config: ConnectionConfig) -> Result<Self> {
        let read_half = transport.try_clone_transport()?;
        let shutdown = transport.try_clone_transport()?;

        let frame_config = FrameConfig {
            read_timeout: Some(config.handshake_timeout),
            write_timeout: Some(config.handshake_timeout),
            ..FrameConfig::default()
        };
        let mut reader = FrameReader::with_config_transport(read_half, frame_config.clone())?;
        let write_half: BoxedTransport = Box::new(transport);
        let mut writer = FrameWriter::with_config_transport(write_half, frame_config)?;

        let negotiated = match handshake_client(&mut reader, &mut writer, &config) {
            Ok(negotiated) => negotiated,
            Err(err) => {
                debug!(%err, "handshake failed");
                let _ = shutdown.shutdown();
                return Err(err);
            }
        };
        let tuning = negotiated.tuning;

        reader.set_read_timeout(None)?;
        writer.get_ref().set_write_timeout(None)?;
        let frame_max = tuning.frame_max as usize;
        reader.set_max_frame_size(frame_max);
        writer.set_max_frame_size(frame_max);

        let now = Instant::now();
        let inner = Arc::new(Inner {
            writer: Mutex::new(writer),
            shutdown: Mutex::new(shutdown),
            closing: AtomicBool::new(false),
            channels: Mutex::new(ChannelTable {
                allocator: Allocator::new(1, tuning.max_channel_id()),
                map: HashMap::new(),
            }),
            terminal: Latch::new(),
            tuning,
            close_timeout: config.close_timeout,
            last_sent: Mutex::new(now),
            last_recv: Mutex::new(now),
            close_listeners: Mutex::new(Vec::new()),
            blocked_listeners: Mutex::new(Vec::new()),
            server_properties: negotiated.server_properties,
            mechanisms: negotiated.mechanisms,
            locales: negotiated.locales,
        });

        let mut threads = Vec::with_capacity(2);
        let spawned = {
            let inner = Arc::clone(&inner);
            thread::Builder::new()
                .name("amqpwire-reader".to_string())
                .spawn(move || inner.read_loop(reader))
        };
        match spawned {
            Ok(handle) => threads.push(handle),
            Err(err) => {
                let err = Error::from(TransportError::Io(err));
                inner.teardown(err.clone());
                return Err(err);
            }
        }

        if !tuning.heartbeat.is_zero() {
            let spawned = {
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name("amqpwire-heartbeat".to_string())
                    .spawn(move || heartbeat::run(&inner, tuning.heartbeat))
            };
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(err) => {
                    let err = Error::from(TransportError::Io(err));
                    inner.teardown(err.clone());
                    return Err(err);
                }
            }
        }

        info!(
            vhost = %config.vhost,
            channel_max = tuning.channel_max,
            frame_max = tuning.frame_max,
            heartbeat_secs = tuning.heartbeat.as_secs(),
            "connection open"
        );

        Ok(Self {
            inner,
            threads: Mutex::new(threads),
        })
    }

    /// The values agreed during `tune`/`tune-ok`.
    pub fn tuning(&self) -> Tuning {
        self.inner.tuning
    }

    pub fn server_properties(&self) -> &FieldTable {
        &self.inner.server_properties
    }

    /// SASL mechanisms the server offered.
    pub fn mechanisms(&self) -> &[String] {
        &self.inner.mechanisms
    }

    pub fn locales(&self) -> &[String] {
        &self.inner.locales
    }

    pub fn is_closed(&self) -> bool {
        self.inner.terminal.is_set()
    }

    /// Allocate an id, send `channel.open` and wait for `open-ok`.
    ///
    /// Fails with [`Error::ChannelsExhausted`] without touching the network
    /// when every negotiated id is in use.
    pub fn open_channel(&self) -> Result<Channel> {
        self.open_channel_with(None)
    }

    /// [`open_channel`](Self::open_channel) that gives up with
    /// [`Error::Cancelled`] once `token` fires.
    ///
    /// A cancelled open closes the half-open channel; its id stays reserved
    /// until the server's `close-ok`. The returned handle carries `token` for
    /// its own blocking calls.
    pub fn open_channel_with_cancel(&self, token: &CancelToken) -> Result<Channel> {
        self.open_channel_with(Some(token.clone()))
    }

    fn open_channel_with(&self, cancel: Option<CancelToken>) -> Result<Channel> {
        let channel = {
            let mut table = self.inner.channels.lock();
            if let Some(err) = self.inner.terminal.get() {
                return Err(err);
            }
            if self.inner.closing.load(Ordering::Acquire) {
                return Err(Error::ConnectionClosed(None));
            }
            let id = table.allocator.next().ok_or(Error::ChannelsExhausted)?;
            let channel = Arc::new(ChannelInner::new(
                id,
                Arc::downgrade(&self.inner),
                self.inner.tuning.frame_max as usize,
                self.inner.close_timeout,
            ));
            table.map.insert(id, Arc::clone(&channel));
            channel
        };

        debug!(channel = channel.id(), "opening channel");
        let channel = Channel::from_inner(channel, cancel);
        match channel.open() {
            Ok(()) => Ok(channel),
            Err(err) => {
                if matches!(err, Error::Cancelled) {
                    // open-ok may still arrive; the close makes the server answer both
                    channel.inner().begin_close();
                }
                if !channel.inner().awaiting_close_ok() {
                    self.inner.release_channel(channel.id());
                }
                Err(err)
            }
        }
    }

    /// Send `connection.close` and wait for `close-ok`.
    ///
    /// Idempotent: concurrent and repeated calls all observe the same terminal
    /// result. A graceful close is `Ok(())`; if the connection already failed,
    /// or the server does not confirm within `close_timeout`, the terminal
    /// error is returned.
    pub fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if !inner.closing.swap(true, Ordering::AcqRel) && !inner.terminal.is_set() {
            info!("closing connection");
            let close = AmqpError::local(REPLY_SUCCESS, "Goodbye").to_close();
            // a failed write tears the connection down itself
            let _ = inner.send_control(&[Frame::method(0, Method::ConnectionClose(close))]);
        }

        let err = match inner.terminal.wait_timeout(inner.close_timeout) {
            Some(err) => err,
            None => {
                warn!(timeout = ?inner.close_timeout, "close-ok not received");
                inner.teardown(Error::CloseTimeout(inner.close_timeout));
                inner
                    .terminal
                    .get()
                    .unwrap_or(Error::CloseTimeout(inner.close_timeout))
            }
        };
        match err {
            Error::ConnectionClosed(None) => Ok(()),
            err => Err(err),
        }
    }

    /// Yields the terminal error once if the connection fails; ends without an
    /// element on a graceful close.
    pub fn notify_close(&self) -> Receiver<Error> {
        let (tx, rx) = unbounded();
        let mut listeners = self.inner.close_listeners.lock();
        match self.inner.terminal.get() {
            Some(err) => {
                if !err.is_graceful() {
                    let _ = tx.send(err);
                }
            }
            None => listeners.push(tx),
        }
        rx
    }

    /// `connection.blocked` / `connection.unblocked` notifications.
    pub fn notify_blocked(&self) -> Receiver<Blocking> {
        let (tx, rx) = unbounded();
        let mut listeners = self.inner.blocked_listeners.lock();
        if !self.inner.terminal.is_set() {
            listeners.push(tx);
        }
        rx
    }

    /// Reserved channel ids, e.g. `allocator[1..2047] 1..3 7`.
    pub fn channel_ids(&self) -> String {
        self.inner.channels.lock().allocator.to_string()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if !self.inner.terminal.is_set() {
            if let Err(err) = self.close() {
                debug!(%err, "close on drop");
            }
        }
        self.inner.teardown(Error::ConnectionClosed(None));
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("tuning", &self.inner.tuning)
            .field("closed", &self.inner.terminal.is_set())
            .finish()
    }
}

impl Inner {
    /// Write frames as one atomic sequence. Refused once the connection is closing.
    pub(crate) fn send(&self, frames: &[Frame]) -> Result<()> {
        self.write(frames, false, || (), |_| {})
    }

    /// Like [`send`](Self::send) but allowed while closing: close, close-ok, heartbeat.
    pub(crate) fn send_control(&self, frames: &[Frame]) -> Result<()> {
        self.write(frames, true, || (), |_| {})
    }

    /// Run `before` and write `frames` under the writer lock; `undo` runs, still
    /// under the lock, if nothing reached the wire.
    pub(crate) fn send_sequenced<R>(
        &self,
        frames: &[Frame],
        before: impl FnOnce() -> R,
        undo: impl FnOnce(&R),
    ) -> Result<R> {
        self.write(frames, false, before, undo)
    }

    fn write<R>(
        &self,
        frames: &[Frame],
        control: bool,
        before: impl FnOnce() -> R,
        undo: impl FnOnce(&R),
    ) -> Result<R> {
        if let Some(err) = self.terminal.get() {
            return Err(err);
        }
        if !control && self.closing.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed(None));
        }

        let mut writer = self.writer.lock();
        let value = before();
        let err = match writer.write_frames(frames) {
            Ok(()) => {
                *self.last_sent.lock() = Instant::now();
                return Ok(value);
            }
            Err(err) => err,
        };
        undo(&value);
        drop(writer);
        // encode and size errors are caught before any byte is written
        if matches!(
            err,
            FrameError::InvalidValue(_) | FrameError::FrameTooLarge { .. }
        ) {
            return Err(Error::InvalidArgument(err.to_string()));
        }

        let err = Error::from(err);
        error!(%err, "connection write failed");
        self.teardown(err.clone());
        Err(self.terminal.get().unwrap_or(err))
    }

    /// Move to the closed state exactly once: shut the transport, fail every
    /// channel and notify listeners.
    pub(crate) fn teardown(&self, err: Error) {
        if !self.terminal.set(err.clone()) {
            return;
        }
        self.closing.store(true, Ordering::Release);
        if let Err(shutdown_err) = self.shutdown.lock().shutdown() {
            debug!(err = %shutdown_err, "transport shutdown");
        }

        let channels: Vec<_> = self.channels.lock().map.drain().map(|(_, ch)| ch).collect();
        for channel in channels {
            channel.terminate(err.clone());
        }

        let listeners = std::mem::take(&mut *self.close_listeners.lock());
        if !err.is_graceful() {
            for listener in listeners {
                let _ = listener.send(err.clone());
            }
        }
        self.blocked_listeners.lock().clear();

        if err.is_graceful() {
            info!("connection closed");
        } else {
            info!(%err, "connection closed");
        }
    }

    pub(crate) fn release_channel(&self, id: u16) {
        let mut table = self.channels.lock();
        if table.map.remove(&id).is_some() {
            table.allocator.release(id);
        }
    }

    fn read_loop(&self, mut reader: FrameReader<BoxedTransport>) {
        loop {
            match reader.read_frame() {
                Ok(frame) => {
                    *self.last_recv.lock() = Instant::now();
                    self.dispatch(frame);
                    if self.terminal.is_set() {
                        break;
                    }
                }
                Err(err) => {
                    if self.terminal.is_set() {
                        break;
                    }
                    let err = Error::from(err);
                    error!(%err, "connection reader failed");
                    self.teardown(err);
                    break;
                }
            }
        }
        debug!("reader stopped");
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Heartbeat => {}
            Frame::Method { channel: 0, method } => self.on_connection_method(method),
            frame if frame.channel() == 0 => {
                self.teardown(Error::UnexpectedFrame(format!(
                    "frame type {} on channel 0",
                    frame.frame_type()
                )));
            }
            frame if self.closing.load(Ordering::Acquire) => {
                self.teardown(Error::UnexpectedFrame(format!(
                    "frame for channel {} while closing",
                    frame.channel()
                )));
            }
            frame => {
                let id = frame.channel();
                let channel = self.channels.lock().map.get(&id).cloned();
                match channel {
                    Some(channel) => channel.handle_frame(self, frame),
                    None => warn!(channel = id, "dropping frame for unknown channel"),
                }
            }
        }
    }

    fn on_connection_method(&self, method: Method) {
        let closing = self.closing.load(Ordering::Acquire);
        match method {
            Method::ConnectionClose(close) => {
                let reason = AmqpError::from_server(&close);
                warn!(%reason, "server closed connection");
                let _ = self.send_control(&[Frame::method(0, Method::ConnectionCloseOk)]);
                self.teardown(Error::ConnectionClosed(Some(reason)));
            }
            Method::ConnectionCloseOk if closing => self.teardown(Error::ConnectionClosed(None)),
            Method::ConnectionBlocked(blocked) if !closing => self.notify_blocked(Blocking {
                active: true,
                reason: blocked.reason,
            }),
            Method::ConnectionUnblocked if !closing => self.notify_blocked(Blocking {
                active: false,
                reason: String::new(),
            }),
            other => self.teardown(Error::UnexpectedFrame(format!(
                "method {} on channel 0",
                other.id()
            ))),
        }
    }

    fn notify_blocked(&self, blocking: Blocking) {
        debug!(active = blocking.active, reason = %blocking.reason, "connection blocking changed");
        self.blocked_listeners
            .lock()
            .retain(|listener| listener.send(blocking.clone()).is_ok());
    }
}
