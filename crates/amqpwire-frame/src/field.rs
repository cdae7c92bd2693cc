//! Field tables: the recursive, dynamically typed key/value structure used for
//! message headers, method arguments and connection properties.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::{put_length_prefixed, put_long_string, put_short_string, Decoder};
use crate::error::{FrameError, Result};

/// Nesting limit for tables and arrays, on both encode and decode.
pub const MAX_NESTING_DEPTH: usize = 64;

/// A fixed-point decimal: `value / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal {
    pub scale: u8,
    pub value: i32,
}

impl Decimal {
    pub fn new(scale: u8, value: i32) -> Self {
        Self { scale, value }
    }
}

/// One value in a field table or field array.
///
/// Type tags follow the set RabbitMQ speaks, which differs from the 0-9-1 grammar
/// for signed 16-bit (`s`) and signed 64-bit (`l`) integers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    F32(f32),
    F64(f64),
    Decimal(Decimal),
    /// Long string (`S`). Usually text, but not required to be UTF-8.
    LongString(Bytes),
    /// Opaque byte array (`x`).
    ByteArray(Bytes),
    Array(Vec<FieldValue>),
    /// Seconds since the Unix epoch.
    Timestamp(u64),
    Table(FieldTable),
    Void,
}

impl FieldValue {
    /// Build a long-string value from text.
    pub fn string(value: impl Into<String>) -> Self {
        FieldValue::LongString(Bytes::from(value.into()))
    }

    /// The wire type tag for this value.
    pub fn tag(&self) -> u8 {
        match self {
            FieldValue::Bool(_) => b't',
            FieldValue::I8(_) => b'b',
            FieldValue::U8(_) => b'B',
            FieldValue::I16(_) => b's',
            FieldValue::U16(_) => b'u',
            FieldValue::I32(_) => b'I',
            FieldValue::U32(_) => b'i',
            FieldValue::I64(_) => b'l',
            FieldValue::F32(_) => b'f',
            FieldValue::F64(_) => b'd',
            FieldValue::Decimal(_) => b'D',
            FieldValue::LongString(_) => b'S',
            FieldValue::ByteArray(_) => b'x',
            FieldValue::Array(_) => b'A',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Table(_) => b'F',
            FieldValue::Void => b'V',
        }
    }

    /// Text view of a long string, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::LongString(raw) => std::str::from_utf8(raw).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&FieldTable> {
        match self {
            FieldValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Widen any integer variant to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            FieldValue::I8(v) => Some(v.into()),
            FieldValue::U8(v) => Some(v.into()),
            FieldValue::I16(v) => Some(v.into()),
            FieldValue::U16(v) => Some(v.into()),
            FieldValue::I32(v) => Some(v.into()),
            FieldValue::U32(v) => Some(v.into()),
            FieldValue::I64(v) => Some(v),
            _ => None,
        }
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut, depth: usize) -> Result<()> {
        dst.put_u8(self.tag());
        match self {
            FieldValue::Bool(v) => dst.put_u8(u8::from(*v)),
            FieldValue::I8(v) => dst.put_i8(*v),
            FieldValue::U8(v) => dst.put_u8(*v),
            FieldValue::I16(v) => dst.put_i16(*v),
            FieldValue::U16(v) => dst.put_u16(*v),
            FieldValue::I32(v) => dst.put_i32(*v),
            FieldValue::U32(v) => dst.put_u32(*v),
            FieldValue::I64(v) => dst.put_i64(*v),
            FieldValue::F32(v) => dst.put_f32(*v),
            FieldValue::F64(v) => dst.put_f64(*v),
            FieldValue::Decimal(d) => {
                dst.put_u8(d.scale);
                dst.put_i32(d.value);
            }
            FieldValue::LongString(raw) | FieldValue::ByteArray(raw) => put_long_string(dst, raw)?,
            FieldValue::Array(values) => {
                check_depth(depth)?;
                put_length_prefixed(dst, |dst| {
                    values.iter().try_for_each(|v| v.encode(dst, depth + 1))
                })?;
            }
            FieldValue::Timestamp(v) => dst.put_u64(*v),
            FieldValue::Table(table) => table.encode_at(dst, depth + 1)?,
            FieldValue::Void => {}
        }
        Ok(())
    }

    pub(crate) fn decode(src: &mut Decoder, depth: usize) -> Result<Self> {
        let tag = src.u8()?;
        let value = match tag {
            b't' => FieldValue::Bool(src.u8()? != 0),
            b'b' => FieldValue::I8(src.i8()?),
            b'B' => FieldValue::U8(src.u8()?),
            b's' | b'U' => FieldValue::I16(src.i16()?),
            b'u' => FieldValue::U16(src.u16()?),
            b'I' => FieldValue::I32(src.i32()?),
            b'i' => FieldValue::U32(src.u32()?),
            b'l' | b'L' => FieldValue::I64(src.i64()?),
            b'f' => FieldValue::F32(src.f32()?),
            b'd' => FieldValue::F64(src.f64()?),
            b'D' => FieldValue::Decimal(Decimal {
                scale: src.u8()?,
                value: src.i32()?,
            }),
            b'S' => FieldValue::LongString(src.long_string()?),
            b'x' => FieldValue::ByteArray(src.long_string()?),
            b'A' => {
                check_depth(depth)?;
                let mut inner = src.sub()?;
                let mut values = Vec::new();
                while inner.remaining() > 0 {
                    values.push(FieldValue::decode(&mut inner, depth + 1)?);
                }
                FieldValue::Array(values)
            }
            b'T' => FieldValue::Timestamp(src.u64()?),
            b'F' => FieldValue::Table(FieldTable::decode_at(src, depth + 1)?),
            b'V' => FieldValue::Void,
            other => return Err(FrameError::UnknownFieldType(other)),
        };
        Ok(value)
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for FieldValue {
            fn from(v: $ty) -> Self {
                FieldValue::$variant(v.into())
            }
        })*
    };
}

field_value_from! {
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Decimal => Decimal,
    FieldTable => Table,
    Vec<FieldValue> => Array,
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::string(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::string(v)
    }
}

fn check_depth(depth: usize) -> Result<()> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(FrameError::InvalidValue(format!(
            "field values nested deeper than {MAX_NESTING_DEPTH}"
        )));
    }
    Ok(())
}

/// A field table.
///
/// Entries keep insertion order so re-encoding a decoded table is bit-exact.
/// Equality ignores order.
#[derive(Clone, Default)]
pub struct FieldTable {
    entries: Vec<(String, FieldValue)>,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or replace a value. A replaced key keeps its original position.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Option<FieldValue> {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        let at = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(at).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Encode as a length-prefixed table.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        self.encode_at(dst, 0)
    }

    /// Decode a length-prefixed table.
    pub fn decode(src: &mut Decoder) -> Result<Self> {
        Self::decode_at(src, 0)
    }

    fn encode_at(&self, dst: &mut BytesMut, depth: usize) -> Result<()> {
        check_depth(depth)?;
        put_length_prefixed(dst, |dst| {
            for (key, value) in &self.entries {
                put_short_string(dst, key)?;
                value.encode(dst, depth)?;
            }
            Ok(())
        })
    }

    fn decode_at(src: &mut Decoder, depth: usize) -> Result<Self> {
        check_depth(depth)?;
        let mut inner = src.sub()?;
        let mut table = FieldTable::new();
        while inner.remaining() > 0 {
            let key = inner.short_string()?;
            let value = FieldValue::decode(&mut inner, depth)?;
            table.entries.push((key, value));
        }
        Ok(table)
    }
}

impl PartialEq for FieldTable {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl fmt::Debug for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldTable {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut table = FieldTable::new();
        for (k, v) in iter {
            table.insert(k, v);
        }
        table
    }
}

impl<'a> IntoIterator for &'a FieldTable {
    type Item = (&'a str, &'a FieldValue);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a FieldValue)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(table: &FieldTable) -> (FieldTable, BytesMut) {
        let mut buf = BytesMut::new();
        table.encode(&mut buf).unwrap();
        let wire = buf.clone();
        let mut d = Decoder::new(buf.freeze());
        let decoded = FieldTable::decode(&mut d).unwrap();
        d.finish("table").unwrap();
        (decoded, wire)
    }

    fn every_kind() -> FieldTable {
        FieldTable::new()
            .with(
                "A",
                vec![
                    FieldValue::Array(vec!["nested array".into(), 3i32.into()]),
                    Decimal::new(2, 1).into(),
                    FieldTable::new().with("S", "nested table in array").into(),
                    (2i32 << 20).into(),
                    "array string".into(),
                    FieldValue::Timestamp(100_000_000),
                    FieldValue::Void,
                    2u8.into(),
                    (-2i8).into(),
                    2.64f64.into(),
                    2.32f32.into(),
                    (2i64 << 60).into(),
                    (2i16 << 10).into(),
                    true.into(),
                    FieldValue::ByteArray(Bytes::from_static(b"b2")),
                ],
            )
            .with("D", Decimal::new(1, 1))
            .with("F", FieldTable::new().with("S", "nested table in table"))
            .with("I", 1i32 << 20)
            .with("S", "string")
            .with("T", FieldValue::Timestamp(100_000_000))
            .with("V", FieldValue::Void)
            .with("B", 1u8)
            .with("b", -1i8)
            .with("d", 1.64f64)
            .with("f", 1.32f32)
            .with("l", 1i64 << 60)
            .with("s", 1i16 << 10)
            .with("u", 7u16)
            .with("i", 9u32)
            .with("t", true)
            .with("x", FieldValue::ByteArray(Bytes::from_static(b"b1")))
    }

    #[test]
    fn roundtrip_all_field_value_types() {
        let table = every_kind();
        let (decoded, _) = roundtrip(&table);
        assert_eq!(decoded, table);
        for (key, value) in &table {
            assert_eq!(decoded.get(key), Some(value), "key {key}");
        }
    }

    #[test]
    fn reencode_is_bit_exact() {
        let (decoded, wire) = roundtrip(&every_kind());
        let mut again = BytesMut::new();
        decoded.encode(&mut again).unwrap();
        assert_eq!(again, wire);
    }

    #[test]
    fn equality_ignores_order() {
        let a = FieldTable::new().with("x", 1i32).with("y", "two");
        let b = FieldTable::new().with("y", "two").with("x", 1i32);
        assert_eq!(a, b);
        assert_ne!(a, FieldTable::new().with("x", 1i32));
    }

    #[test]
    fn insert_replaces_in_place() {
        let mut t = FieldTable::new().with("a", 1i32).with("b", 2i32);
        assert_eq!(t.insert("a", 3i32), Some(FieldValue::I32(1)));
        let keys: Vec<_> = t.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(t.get("a").and_then(FieldValue::as_i64), Some(3));
    }

    #[test]
    fn empty_table_is_four_zero_bytes() {
        let mut buf = BytesMut::new();
        FieldTable::new().encode(&mut buf).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn unknown_tag_is_decode_fault() {
        // table { "k": <tag 'Z'> }
        let wire = Bytes::from_static(&[0, 0, 0, 3, 1, b'k', b'Z']);
        let err = FieldTable::decode(&mut Decoder::new(wire)).unwrap_err();
        assert!(matches!(err, FrameError::UnknownFieldType(b'Z')));
        assert!(err.is_decode());
    }

    #[test]
    fn table_length_past_payload_is_malformed() {
        let wire = Bytes::from_static(&[0, 0, 0, 9, 1, b'k', b'V']);
        let err = FieldTable::decode(&mut Decoder::new(wire)).unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn accepts_amqp_grammar_tag_aliases() {
        // { "a": 'L' i64 1, "b": 'U' i16 -1 }
        let wire = Bytes::from_static(&[
            0, 0, 0, 16, 1, b'a', b'L', 0, 0, 0, 0, 0, 0, 0, 1, 1, b'b', b'U', 0xff, 0xff,
        ]);
        let t = FieldTable::decode(&mut Decoder::new(wire)).unwrap();
        assert_eq!(t.get("a"), Some(&FieldValue::I64(1)));
        assert_eq!(t.get("b"), Some(&FieldValue::I16(-1)));
    }

    #[test]
    fn long_key_is_rejected_before_sending() {
        let t = FieldTable::new().with("k".repeat(300), 1i32);
        let err = t.encode(&mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, FrameError::InvalidValue(_)));
    }

    #[test]
    fn nesting_limit_enforced() {
        let mut value = FieldValue::Void;
        for _ in 0..(MAX_NESTING_DEPTH + 1) {
            value = FieldValue::Array(vec![value]);
        }
        let t = FieldTable::new().with("deep", value);
        assert!(matches!(
            t.encode(&mut BytesMut::new()),
            Err(FrameError::InvalidValue(_))
        ));
    }

    #[test]
    fn string_accessor() {
        let v = FieldValue::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.tag(), b'S');
        assert_eq!(FieldValue::from(5u8).as_str(), None);
    }
}
