use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::buffer::{put_length_prefixed, Decoder};
use crate::error::{FrameError, Result};
use crate::method::Method;
use crate::properties::ContentHeader;

/// Frame header: type (1) + channel (2) + length (4) = 7 bytes.
pub const FRAME_HEADER_SIZE: usize = 7;

/// Header plus the trailing end marker.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + 1;

/// Every frame ends with this octet.
pub const FRAME_END: u8 = 0xCE;

/// Smallest `frame-max` a peer may negotiate.
pub const FRAME_MIN_SIZE: usize = 4096;

/// Frame size proposed before tuning; also the limit applied to the server's `start`.
pub const DEFAULT_FRAME_MAX: usize = 128 * 1024;

/// Sent by the client before the first frame.
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

pub const FRAME_METHOD: u8 = 1;
pub const FRAME_HEADER: u8 = 2;
pub const FRAME_BODY: u8 = 3;
pub const FRAME_HEARTBEAT: u8 = 8;

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Method { channel: u16, method: Method },
    Header { channel: u16, header: ContentHeader },
    Body { channel: u16, payload: Bytes },
    /// Always on channel 0.
    Heartbeat,
}

impl Frame {
    pub fn method(channel: u16, method: Method) -> Self {
        Frame::Method { channel, method }
    }

    pub fn channel(&self) -> u16 {
        match self {
            Frame::Method { channel, .. }
            | Frame::Header { channel, .. }
            | Frame::Body { channel, .. } => *channel,
            Frame::Heartbeat => 0,
        }
    }

    pub fn frame_type(&self) -> u8 {
        match self {
            Frame::Method { .. } => FRAME_METHOD,
            Frame::Header { .. } => FRAME_HEADER,
            Frame::Body { .. } => FRAME_BODY,
            Frame::Heartbeat => FRAME_HEARTBEAT,
        }
    }
}

/// Encode a frame into the wire format.
///
/// ```text
/// ┌──────────┬─────────────┬──────────────┬─────────────────┬──────┐
/// │ Type (1) │ Channel (2) │ Length (4BE) │ Payload         │ 0xCE │
/// └──────────┴─────────────┴──────────────┴─────────────────┴──────┘
/// ```
pub fn encode_frame(frame: &Frame, dst: &mut BytesMut) -> Result<()> {
    dst.put_u8(frame.frame_type());
    dst.put_u16(frame.channel());
    put_length_prefixed(dst, |dst| match frame {
        Frame::Method { method, .. } => method.encode(dst),
        Frame::Header { header, .. } => header.encode(dst),
        Frame::Body { payload, .. } => {
            dst.put_slice(payload);
            Ok(())
        }
        Frame::Heartbeat => Ok(()),
    })?;
    dst.put_u8(FRAME_END);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer. A `max_frame` of 0
/// means no limit.
pub fn decode_frame(src: &mut BytesMut, max_frame: usize) -> Result<Option<Frame>> {
    if src.len() < FRAME_HEADER_SIZE {
        return Ok(None);
    }

    if src[0] == PROTOCOL_HEADER[0] {
        if src.len() < PROTOCOL_HEADER.len() {
            return Ok(None);
        }
        if src[..4] == PROTOCOL_HEADER[..4] {
            return Err(FrameError::ProtocolHeader {
                major: src[5],
                minor: src[6],
                revision: src[7],
            });
        }
    }

    let frame_type = src[0];
    if !matches!(
        frame_type,
        FRAME_METHOD | FRAME_HEADER | FRAME_BODY | FRAME_HEARTBEAT
    ) {
        return Err(FrameError::UnknownFrameType(frame_type));
    }
    let channel = u16::from_be_bytes([src[1], src[2]]);
    let payload_len = u32::from_be_bytes([src[3], src[4], src[5], src[6]]) as usize;

    let total = FRAME_OVERHEAD.saturating_add(payload_len);
    if max_frame != 0 && total > max_frame {
        return Err(FrameError::FrameTooLarge {
            size: total,
            max: max_frame,
        });
    }
    if src.len() < total {
        return Ok(None);
    }

    let end = src[total - 1];
    if end != FRAME_END {
        return Err(FrameError::BadFrameEnd(end));
    }

    src.advance(FRAME_HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    src.advance(1);

    let frame = match frame_type {
        FRAME_METHOD => Frame::Method {
            channel,
            method: Method::decode(Decoder::new(payload))?,
        },
        FRAME_HEADER => Frame::Header {
            channel,
            header: ContentHeader::decode(Decoder::new(payload))?,
        },
        FRAME_BODY => Frame::Body { channel, payload },
        _ => {
            if channel != 0 {
                return Err(FrameError::Malformed(format!(
                    "heartbeat on channel {channel}"
                )));
            }
            if !payload.is_empty() {
                return Err(FrameError::Malformed(format!(
                    "heartbeat with {} payload bytes",
                    payload.len()
                )));
            }
            Frame::Heartbeat
        }
    };
    Ok(Some(frame))
}

/// Split a message body into body frames that fit in `frame_max`.
///
/// A `frame_max` of 0 sends the body as one frame. An empty body produces no
/// frames.
pub fn body_frames(channel: u16, body: &Bytes, frame_max: usize) -> Vec<Frame> {
    if body.is_empty() {
        return Vec::new();
    }
    let chunk = if frame_max == 0 {
        body.len()
    } else {
        frame_max.saturating_sub(FRAME_OVERHEAD).max(1)
    };
    let mut frames = Vec::with_capacity(body.len().div_ceil(chunk));
    let mut offset = 0;
    while offset < body.len() {
        let end = (offset + chunk).min(body.len());
        frames.push(Frame::Body {
            channel,
            payload: body.slice(offset..end),
        });
        offset = end;
    }
    frames
}

/// Configuration for the frame reader and writer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest accepted frame including header and end marker; 0 disables the check.
    pub max_frame_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<std::time::Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<std::time::Duration>,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_FRAME_MAX,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{BasicAck, Close};
    use crate::properties::BasicProperties;

    fn encoded(frame: &Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn heartbeat_wire_layout() {
        let buf = encoded(&Frame::Heartbeat);
        assert_eq!(&buf[..], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn method_frame_roundtrip() {
        let frame = Frame::method(
            3,
            Method::BasicAck(BasicAck {
                delivery_tag: 42,
                multiple: true,
            }),
        );
        let mut buf = encoded(&frame);
        assert_eq!(buf[0], FRAME_METHOD);
        assert_eq!(&buf[1..3], &[0, 3]);
        assert_eq!(&buf[3..7], &[0, 0, 0, 13]);

        let decoded = decode_frame(&mut buf, DEFAULT_FRAME_MAX).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_and_body_roundtrip() {
        let header = Frame::Header {
            channel: 1,
            header: ContentHeader::basic(
                5,
                BasicProperties {
                    content_type: Some("text/plain".into()),
                    ..BasicProperties::default()
                },
            ),
        };
        let body = Frame::Body {
            channel: 1,
            payload: Bytes::from_static(b"hello"),
        };
        let mut buf = encoded(&header);
        buf.extend_from_slice(&encoded(&body));

        assert_eq!(decode_frame(&mut buf, 0).unwrap().unwrap(), header);
        assert_eq!(decode_frame(&mut buf, 0).unwrap().unwrap(), body);
        assert!(buf.is_empty());
    }

    #[test]
    fn incomplete_frame_waits() {
        let full = encoded(&Frame::method(1, Method::ChannelOpen));
        for cut in 0..full.len() {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(decode_frame(&mut partial, 0).unwrap().is_none(), "cut {cut}");
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn bad_frame_end_is_rejected() {
        let mut buf = encoded(&Frame::Heartbeat);
        let last = buf.len() - 1;
        buf[last] = 0x00;
        assert!(matches!(
            decode_frame(&mut buf, 0),
            Err(FrameError::BadFrameEnd(0x00))
        ));
    }

    #[test]
    fn length_inconsistent_with_stream_is_framing_fault() {
        // declared length 4 but the byte after 4 payload bytes is not the marker
        let mut buf = BytesMut::from(&[3, 0, 1, 0, 0, 0, 4, 1, 2, 3, 4, 5, 0xCE][..]);
        let err = decode_frame(&mut buf, 0).unwrap_err();
        assert!(err.is_framing());
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let mut buf = BytesMut::from(&[9, 0, 0, 0, 0, 0, 0, 0xCE][..]);
        assert!(matches!(
            decode_frame(&mut buf, 0),
            Err(FrameError::UnknownFrameType(9))
        ));
    }

    #[test]
    fn heartbeat_on_channel_is_malformed() {
        let mut buf = BytesMut::from(&[8, 0, 5, 0, 0, 0, 0, 0xCE][..]);
        assert!(matches!(
            decode_frame(&mut buf, 0),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_before_buffering() {
        let mut buf = BytesMut::new();
        buf.put_u8(FRAME_BODY);
        buf.put_u16(1);
        buf.put_u32(FRAME_MIN_SIZE as u32);
        let err = decode_frame(&mut buf, FRAME_MIN_SIZE).unwrap_err();
        assert!(matches!(
            err,
            FrameError::FrameTooLarge { size, max } if size == FRAME_MIN_SIZE + 8 && max == FRAME_MIN_SIZE
        ));
    }

    #[test]
    fn protocol_header_reply_is_reported() {
        let mut buf = BytesMut::from(&b"AMQP\x00\x00\x08\x00"[..]);
        assert!(matches!(
            decode_frame(&mut buf, 0),
            Err(FrameError::ProtocolHeader {
                major: 0,
                minor: 8,
                revision: 0
            })
        ));
    }

    #[test]
    fn decode_fault_inside_valid_envelope() {
        let close = Frame::method(
            0,
            Method::ConnectionClose(Close {
                reply_code: 320,
                reply_text: "bye".into(),
                ..Close::default()
            }),
        );
        let mut buf = encoded(&close);
        // rewrite method id to one the schema does not have
        buf[FRAME_HEADER_SIZE + 3] = 99;
        let err = decode_frame(&mut buf, 0).unwrap_err();
        assert!(err.is_decode());
    }

    #[test]
    fn body_split_respects_frame_max() {
        let body = Bytes::from(vec![7u8; 10_000]);
        let frames = body_frames(1, &body, FRAME_MIN_SIZE);
        assert_eq!(frames.len(), 3);
        let mut total = 0;
        for frame in &frames {
            let size = encoded(frame).len();
            assert!(size <= FRAME_MIN_SIZE);
            if let Frame::Body { payload, .. } = frame {
                total += payload.len();
            }
        }
        assert_eq!(total, body.len());
    }

    #[test]
    fn body_split_edge_cases() {
        assert!(body_frames(1, &Bytes::new(), FRAME_MIN_SIZE).is_empty());
        let body = Bytes::from(vec![1u8; 1 << 20]);
        assert_eq!(body_frames(1, &body, 0).len(), 1);
    }
}
