use bytes::{BufMut, BytesMut};

use crate::buffer::{put_short_string, Decoder};
use crate::error::{FrameError, Result};
use crate::field::FieldTable;
use crate::method::CLASS_BASIC;

const CONTENT_TYPE: u16 = 1 << 15;
const CONTENT_ENCODING: u16 = 1 << 14;
const HEADERS: u16 = 1 << 13;
const DELIVERY_MODE: u16 = 1 << 12;
const PRIORITY: u16 = 1 << 11;
const CORRELATION_ID: u16 = 1 << 10;
const REPLY_TO: u16 = 1 << 9;
const EXPIRATION: u16 = 1 << 8;
const MESSAGE_ID: u16 = 1 << 7;
const TIMESTAMP: u16 = 1 << 6;
const KIND: u16 = 1 << 5;
const USER_ID: u16 = 1 << 4;
const APP_ID: u16 = 1 << 3;
const CLUSTER_ID: u16 = 1 << 2;
const CONTINUATION: u16 = 1;

/// Delivery mode value for transient messages.
pub const TRANSIENT: u8 = 1;
/// Delivery mode value for messages the broker writes to disk.
pub const PERSISTENT: u8 = 2;

/// Properties of the `basic` content class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub headers: Option<FieldTable>,
    /// [`TRANSIENT`] or [`PERSISTENT`].
    pub delivery_mode: Option<u8>,
    pub priority: Option<u8>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub expiration: Option<String>,
    pub message_id: Option<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<u64>,
    /// The `type` property.
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub cluster_id: Option<String>,
}

impl BasicProperties {
    fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut set = |present: bool, bit: u16| {
            if present {
                flags |= bit;
            }
        };
        set(self.content_type.is_some(), CONTENT_TYPE);
        set(self.content_encoding.is_some(), CONTENT_ENCODING);
        set(self.headers.is_some(), HEADERS);
        set(self.delivery_mode.is_some(), DELIVERY_MODE);
        set(self.priority.is_some(), PRIORITY);
        set(self.correlation_id.is_some(), CORRELATION_ID);
        set(self.reply_to.is_some(), REPLY_TO);
        set(self.expiration.is_some(), EXPIRATION);
        set(self.message_id.is_some(), MESSAGE_ID);
        set(self.timestamp.is_some(), TIMESTAMP);
        set(self.kind.is_some(), KIND);
        set(self.user_id.is_some(), USER_ID);
        set(self.app_id.is_some(), APP_ID);
        set(self.cluster_id.is_some(), CLUSTER_ID);
        flags
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u16(self.flags());
        let short = |dst: &mut BytesMut, v: &Option<String>| match v {
            Some(s) => put_short_string(dst, s),
            None => Ok(()),
        };
        short(dst, &self.content_type)?;
        short(dst, &self.content_encoding)?;
        if let Some(headers) = &self.headers {
            headers.encode(dst)?;
        }
        if let Some(mode) = self.delivery_mode {
            dst.put_u8(mode);
        }
        if let Some(priority) = self.priority {
            dst.put_u8(priority);
        }
        short(dst, &self.correlation_id)?;
        short(dst, &self.reply_to)?;
        short(dst, &self.expiration)?;
        short(dst, &self.message_id)?;
        if let Some(ts) = self.timestamp {
            dst.put_u64(ts);
        }
        short(dst, &self.kind)?;
        short(dst, &self.user_id)?;
        short(dst, &self.app_id)?;
        short(dst, &self.cluster_id)
    }

    pub(crate) fn decode(src: &mut Decoder) -> Result<Self> {
        let flags = src.u16()?;
        if flags & CONTINUATION != 0 {
            return Err(FrameError::Malformed(
                "basic properties do not use a continuation flag word".to_string(),
            ));
        }
        let short = |src: &mut Decoder, bit: u16| -> Result<Option<String>> {
            if flags & bit != 0 {
                src.short_string().map(Some)
            } else {
                Ok(None)
            }
        };
        Ok(Self {
            content_type: short(src, CONTENT_TYPE)?,
            content_encoding: short(src, CONTENT_ENCODING)?,
            headers: if flags & HEADERS != 0 {
                Some(FieldTable::decode(src)?)
            } else {
                None
            },
            delivery_mode: if flags & DELIVERY_MODE != 0 {
                Some(src.u8()?)
            } else {
                None
            },
            priority: if flags & PRIORITY != 0 {
                Some(src.u8()?)
            } else {
                None
            },
            correlation_id: short(src, CORRELATION_ID)?,
            reply_to: short(src, REPLY_TO)?,
            expiration: short(src, EXPIRATION)?,
            message_id: short(src, MESSAGE_ID)?,
            timestamp: if flags & TIMESTAMP != 0 {
                Some(src.u64()?)
            } else {
                None
            },
            kind: short(src, KIND)?,
            user_id: short(src, USER_ID)?,
            app_id: short(src, APP_ID)?,
            cluster_id: short(src, CLUSTER_ID)?,
        })
    }
}

/// Payload of a content-header frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    pub class_id: u16,
    /// Total length of the body frames that follow.
    pub body_size: u64,
    pub properties: BasicProperties,
}

impl ContentHeader {
    pub fn basic(body_size: u64, properties: BasicProperties) -> Self {
        Self {
            class_id: CLASS_BASIC,
            body_size,
            properties,
        }
    }

    pub(crate) fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u16(self.class_id);
        // weight, unused
        dst.put_u16(0);
        dst.put_u64(self.body_size);
        self.properties.encode(dst)
    }

    pub(crate) fn decode(mut src: Decoder) -> Result<Self> {
        let class_id = src.u16()?;
        let _weight = src.u16()?;
        let body_size = src.u64()?;
        let properties = BasicProperties::decode(&mut src)?;
        src.finish("content header")?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }
}
