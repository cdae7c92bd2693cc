#![allow(dead_code)]

use std::io::{ErrorKind, Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use amqpwire_client::{Connection, ConnectionConfig};
use amqpwire_frame::method::{
    BasicPublish, ConnectionStart, ConnectionStartOk, ConnectionOpen, Tune,
};
use amqpwire_frame::{
    BasicProperties, ContentHeader, FieldTable, Frame, FrameError, FrameReader, FrameWriter,
    Method, PROTOCOL_HEADER,
};
use bytes::Bytes;

/// What the client sent while opening the connection.
pub struct Opened {
    pub start_ok: ConnectionStartOk,
    pub tune_ok: Tune,
    pub open: ConnectionOpen,
}

/// A published message as seen on the wire.
pub struct Published {
    pub channel: u16,
    pub method: BasicPublish,
    pub header: ContentHeader,
    pub body: Bytes,
    pub body_frames: Vec<usize>,
}

/// Scripted broker side of a `UnixStream::pair`.
pub struct Broker {
    pub reader: FrameReader<UnixStream>,
    pub writer: FrameWriter<UnixStream>,
    raw: UnixStream,
}

impl Broker {
    /// Read the client's protocol header and wrap the stream.
    pub fn accept(mut stream: UnixStream) -> Self {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).unwrap();
        assert_eq!(header, PROTOCOL_HEADER);
        let reader = FrameReader::new(stream.try_clone().unwrap());
        let raw = stream.try_clone().unwrap();
        Self {
            reader,
            writer: FrameWriter::new(stream),
            raw,
        }
    }

    pub fn start(&mut self, mechanisms: &str) {
        self.send(
            0,
            Method::ConnectionStart(ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: FieldTable::new().with("product", "fake-broker"),
                mechanisms: Bytes::copy_from_slice(mechanisms.as_bytes()),
                locales: Bytes::from_static(b"en_US"),
            }),
        );
    }

    pub fn expect_start_ok(&mut self) -> ConnectionStartOk {
        match self.recv_method_on(0) {
            Method::ConnectionStartOk(start_ok) => start_ok,
            other => panic!("expected start-ok, got {other:?}"),
        }
    }

    /// tune, tune-ok, open, open-ok.
    pub fn finish_handshake(&mut self, tune: Tune) -> (Tune, ConnectionOpen) {
        self.send(0, Method::ConnectionTune(tune));
        let tune_ok = match self.recv_method_on(0) {
            Method::ConnectionTuneOk(tune_ok) => tune_ok,
            other => panic!("expected tune-ok, got {other:?}"),
        };
        let open = match self.recv_method_on(0) {
            Method::ConnectionOpen(open) => open,
            other => panic!("expected connection.open, got {other:?}"),
        };
        self.send(0, Method::ConnectionOpenOk);
        (tune_ok, open)
    }

    pub fn handshake(&mut self, tune: Tune) -> Opened {
        self.start("PLAIN AMQPLAIN");
        let start_ok = self.expect_start_ok();
        let (tune_ok, open) = self.finish_handshake(tune);
        Opened {
            start_ok,
            tune_ok,
            open,
        }
    }

    pub fn send(&mut self, channel: u16, method: Method) {
        self.writer.write_frame(&Frame::method(channel, method)).unwrap();
    }

    /// Method, header, then one body frame per chunk.
    pub fn send_content(
        &mut self,
        channel: u16,
        method: Method,
        properties: BasicProperties,
        size: u64,
        chunks: &[&[u8]],
    ) {
        let mut frames = vec![
            Frame::method(channel, method),
            Frame::Header {
                channel,
                header: ContentHeader::basic(size, properties),
            },
        ];
        for chunk in chunks {
            frames.push(Frame::Body {
                channel,
                payload: Bytes::copy_from_slice(chunk),
            });
        }
        self.writer.write_frames(&frames).unwrap();
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.raw.write_all(bytes).unwrap();
    }

    pub fn shutdown(&self) {
        let _ = self.raw.shutdown(std::net::Shutdown::Both);
    }

    /// Next frame, heartbeats included.
    pub fn recv_frame(&mut self) -> Frame {
        self.reader.read_frame().unwrap()
    }

    /// Next non-heartbeat frame.
    pub fn recv(&mut self) -> Frame {
        loop {
            match self.reader.read_frame().unwrap() {
                Frame::Heartbeat => continue,
                frame => return frame,
            }
        }
    }

    pub fn recv_method(&mut self) -> (u16, Method) {
        match self.recv() {
            Frame::Method { channel, method } => (channel, method),
            other => panic!("expected method frame, got {other:?}"),
        }
    }

    pub fn recv_method_on(&mut self, expected: u16) -> Method {
        let (channel, method) = self.recv_method();
        assert_eq!(channel, expected, "method {method:?} on wrong channel");
        method
    }

    /// Whether anything other than a heartbeat arrives within `wait`.
    pub fn quiet_for(&mut self, wait: Duration) -> bool {
        self.reader.set_read_timeout(Some(wait)).unwrap();
        let quiet = loop {
            match self.reader.read_frame() {
                Ok(Frame::Heartbeat) => continue,
                Ok(frame) => panic!("expected silence, got {frame:?}"),
                Err(FrameError::Io(err))
                    if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
                {
                    break true
                }
                Err(err) => panic!("read failed: {err}"),
            }
        };
        self.reader.set_read_timeout(None).unwrap();
        quiet
    }

    /// Wait for the client to close the stream.
    pub fn expect_eof(&mut self) {
        loop {
            match self.reader.read_frame() {
                Ok(_) => continue,
                Err(FrameError::ConnectionClosed) => return,
                Err(err) => panic!("expected clean EOF, got {err}"),
            }
        }
    }

    /// Answer `channel.open`; returns the channel id.
    pub fn expect_channel_open(&mut self) -> u16 {
        let (channel, method) = self.recv_method();
        assert!(matches!(method, Method::ChannelOpen), "got {method:?}");
        self.send(channel, Method::ChannelOpenOk);
        channel
    }

    /// Answer a client `channel.close`; returns its reply code.
    pub fn expect_channel_close(&mut self, channel: u16) -> u16 {
        match self.recv_method_on(channel) {
            Method::ChannelClose(close) => {
                self.send(channel, Method::ChannelCloseOk);
                close.reply_code
            }
            other => panic!("expected channel.close, got {other:?}"),
        }
    }

    pub fn expect_connection_close(&mut self) -> u16 {
        match self.recv_method_on(0) {
            Method::ConnectionClose(close) => {
                self.send(0, Method::ConnectionCloseOk);
                close.reply_code
            }
            other => panic!("expected connection.close, got {other:?}"),
        }
    }

    pub fn recv_publish(&mut self) -> Published {
        let (channel, method) = self.recv_method();
        let method = match method {
            Method::BasicPublish(publish) => publish,
            other => panic!("expected basic.publish, got {other:?}"),
        };
        let header = match self.recv() {
            Frame::Header { header, .. } => header,
            other => panic!("expected content header, got {other:?}"),
        };
        let mut body = Vec::new();
        let mut body_frames = Vec::new();
        while (body.len() as u64) < header.body_size {
            match self.recv() {
                Frame::Body { payload, .. } => {
                    body_frames.push(payload.len());
                    body.extend_from_slice(&payload);
                }
                other => panic!("expected content body, got {other:?}"),
            }
        }
        Published {
            channel,
            method,
            header,
            body: Bytes::from(body),
            body_frames,
        }
    }
}

pub fn tune() -> Tune {
    Tune {
        channel_max: 2047,
        frame_max: 131_072,
        heartbeat: 0,
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig {
        heartbeat: Duration::ZERO,
        handshake_timeout: Duration::from_secs(5),
        close_timeout: Duration::from_secs(2),
        ..ConnectionConfig::default()
    }
}

pub fn connect() -> (Connection, Broker) {
    connect_with(config(), tune())
}

pub fn connect_with(config: ConnectionConfig, tune: Tune) -> (Connection, Broker) {
    let (client, server) = UnixStream::pair().unwrap();
    let broker = thread::spawn(move || {
        let mut broker = Broker::accept(server);
        broker.handshake(tune);
        broker
    });
    let conn = Connection::open(client, config).unwrap();
    (conn, broker.join().unwrap())
}

/// Open one channel with the broker answering on a helper thread.
pub fn open_channel(conn: &Connection, broker: Broker) -> (amqpwire_client::Channel, Broker) {
    let handle = thread::spawn(move || {
        let mut broker = broker;
        broker.expect_channel_open();
        broker
    });
    let channel = conn.open_channel().unwrap();
    (channel, handle.join().unwrap())
}
