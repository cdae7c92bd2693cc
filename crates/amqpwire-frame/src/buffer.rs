use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};

/// Cursor over one frame payload.
///
/// Every read checks the remaining length first, so a payload that is shorter than
/// its schema says surfaces as [`FrameError::Malformed`] rather than a panic.
#[derive(Debug)]
pub struct Decoder {
    buf: Bytes,
}

impl Decoder {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, what: &str, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(FrameError::short(what, n, self.buf.remaining()));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need("octet", 1)?;
        Ok(self.buf.get_u8())
    }

    pub fn i8(&mut self) -> Result<i8> {
        self.need("octet", 1)?;
        Ok(self.buf.get_i8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need("short", 2)?;
        Ok(self.buf.get_u16())
    }

    pub fn i16(&mut self) -> Result<i16> {
        self.need("short", 2)?;
        Ok(self.buf.get_i16())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need("long", 4)?;
        Ok(self.buf.get_u32())
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.need("long", 4)?;
        Ok(self.buf.get_i32())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need("longlong", 8)?;
        Ok(self.buf.get_u64())
    }

    pub fn i64(&mut self) -> Result<i64> {
        self.need("longlong", 8)?;
        Ok(self.buf.get_i64())
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.need("float", 4)?;
        Ok(self.buf.get_f32())
    }

    pub fn f64(&mut self) -> Result<f64> {
        self.need("double", 8)?;
        Ok(self.buf.get_f64())
    }

    pub fn bytes(&mut self, n: usize) -> Result<Bytes> {
        self.need("byte run", n)?;
        Ok(self.buf.split_to(n))
    }

    pub fn short_string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let raw = self.bytes(len)?;
        Ok(String::from_utf8(raw.to_vec())?)
    }

    pub fn long_string(&mut self) -> Result<Bytes> {
        let len = self.u32()? as usize;
        self.bytes(len)
    }

    /// Split off a length-prefixed sub-region (tables, arrays) as its own decoder.
    pub fn sub(&mut self) -> Result<Decoder> {
        let len = self.u32()? as usize;
        Ok(Decoder::new(self.bytes(len)?))
    }

    pub fn take_rest(&mut self) -> Bytes {
        let len = self.buf.remaining();
        self.buf.split_to(len)
    }

    /// Reject bytes the schema did not account for.
    pub fn finish(self, what: &str) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(FrameError::Malformed(format!(
                "{what}: {} trailing bytes",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}

pub fn put_short_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    if value.len() > u8::MAX as usize {
        return Err(FrameError::InvalidValue(format!(
            "short string too long ({} bytes, max 255)",
            value.len()
        )));
    }
    dst.put_u8(value.len() as u8);
    dst.put_slice(value.as_bytes());
    Ok(())
}

pub fn put_long_string(dst: &mut BytesMut, value: &[u8]) -> Result<()> {
    let len = long_len(value.len())?;
    dst.put_u32(len);
    dst.put_slice(value);
    Ok(())
}

pub fn long_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        FrameError::InvalidValue(format!("long value too long ({len} bytes, max 4 GiB)"))
    })
}

/// Write a u32 length placeholder, run `body`, then patch the real length in.
pub fn put_length_prefixed(
    dst: &mut BytesMut,
    body: impl FnOnce(&mut BytesMut) -> Result<()>,
) -> Result<()> {
    let at = dst.len();
    dst.put_u32(0);
    body(dst)?;
    let len = long_len(dst.len() - at - 4)?;
    dst[at..at + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_scalars() {
        let mut d = Decoder::new(Bytes::from_static(&[
            0x01, 0x02, 0x03, 0x00, 0x00, 0x00, 0x04, 0xff, 0xff,
        ]));
        assert_eq!(d.u8().unwrap(), 1);
        assert_eq!(d.u16().unwrap(), 0x0203);
        assert_eq!(d.u32().unwrap(), 4);
        assert_eq!(d.i16().unwrap(), -1);
        d.finish("scalars").unwrap();
    }

    #[test]
    fn short_read_is_malformed() {
        let mut d = Decoder::new(Bytes::from_static(&[0x00, 0x01]));
        let err = d.u32().unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
        assert!(err.is_framing());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut d = Decoder::new(Bytes::from_static(&[0x00, 0x01, 0x02]));
        d.u16().unwrap();
        assert!(matches!(d.finish("test"), Err(FrameError::Malformed(_))));
    }

    #[test]
    fn short_string_limit() {
        let mut buf = BytesMut::new();
        put_short_string(&mut buf, &"a".repeat(255)).unwrap();
        assert_eq!(buf.len(), 256);

        let err = put_short_string(&mut buf, &"a".repeat(256)).unwrap_err();
        assert!(matches!(err, FrameError::InvalidValue(_)));
    }

    #[test]
    fn short_string_rejects_invalid_utf8() {
        let mut d = Decoder::new(Bytes::from_static(&[0x02, 0xc3, 0x28]));
        assert!(matches!(d.short_string(), Err(FrameError::InvalidUtf8(_))));
    }

    #[test]
    fn length_prefix_is_patched() {
        let mut buf = BytesMut::new();
        put_length_prefixed(&mut buf, |dst| {
            dst.put_slice(b"abc");
            Ok(())
        })
        .unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
    }
}
