//! The AMQP 0-9-1 method schema: class/method ids and positional argument
//! encoding for every method a client sends or receives.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::buffer::{put_long_string, put_short_string, Decoder};
use crate::error::{FrameError, Result};
use crate::field::FieldTable;

pub const CLASS_CONNECTION: u16 = 10;
pub const CLASS_CHANNEL: u16 = 20;
pub const CLASS_EXCHANGE: u16 = 40;
pub const CLASS_QUEUE: u16 = 50;
pub const CLASS_BASIC: u16 = 60;
pub const CLASS_CONFIRM: u16 = 85;
pub const CLASS_TX: u16 = 90;

/// A class/method pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    pub class_id: u16,
    pub method_id: u16,
}

impl MethodId {
    pub const fn new(class_id: u16, method_id: u16) -> Self {
        Self {
            class_id,
            method_id,
        }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_id, self.method_id)
    }
}

pub const CONNECTION_START: MethodId = MethodId::new(CLASS_CONNECTION, 10);
pub const CONNECTION_START_OK: MethodId = MethodId::new(CLASS_CONNECTION, 11);
pub const CONNECTION_SECURE: MethodId = MethodId::new(CLASS_CONNECTION, 20);
pub const CONNECTION_SECURE_OK: MethodId = MethodId::new(CLASS_CONNECTION, 21);
pub const CONNECTION_TUNE: MethodId = MethodId::new(CLASS_CONNECTION, 30);
pub const CONNECTION_TUNE_OK: MethodId = MethodId::new(CLASS_CONNECTION, 31);
pub const CONNECTION_OPEN: MethodId = MethodId::new(CLASS_CONNECTION, 40);
pub const CONNECTION_OPEN_OK: MethodId = MethodId::new(CLASS_CONNECTION, 41);
pub const CONNECTION_CLOSE: MethodId = MethodId::new(CLASS_CONNECTION, 50);
pub const CONNECTION_CLOSE_OK: MethodId = MethodId::new(CLASS_CONNECTION, 51);
pub const CONNECTION_BLOCKED: MethodId = MethodId::new(CLASS_CONNECTION, 60);
pub const CONNECTION_UNBLOCKED: MethodId = MethodId::new(CLASS_CONNECTION, 61);

pub const CHANNEL_OPEN: MethodId = MethodId::new(CLASS_CHANNEL, 10);
pub const CHANNEL_OPEN_OK: MethodId = MethodId::new(CLASS_CHANNEL, 11);
pub const CHANNEL_FLOW: MethodId = MethodId::new(CLASS_CHANNEL, 20);
pub const CHANNEL_FLOW_OK: MethodId = MethodId::new(CLASS_CHANNEL, 21);
pub const CHANNEL_CLOSE: MethodId = MethodId::new(CLASS_CHANNEL, 40);
pub const CHANNEL_CLOSE_OK: MethodId = MethodId::new(CLASS_CHANNEL, 41);

pub const EXCHANGE_DECLARE: MethodId = MethodId::new(CLASS_EXCHANGE, 10);
pub const EXCHANGE_DECLARE_OK: MethodId = MethodId::new(CLASS_EXCHANGE, 11);
pub const EXCHANGE_DELETE: MethodId = MethodId::new(CLASS_EXCHANGE, 20);
pub const EXCHANGE_DELETE_OK: MethodId = MethodId::new(CLASS_EXCHANGE, 21);
pub const EXCHANGE_BIND: MethodId = MethodId::new(CLASS_EXCHANGE, 30);
pub const EXCHANGE_BIND_OK: MethodId = MethodId::new(CLASS_EXCHANGE, 31);
pub const EXCHANGE_UNBIND: MethodId = MethodId::new(CLASS_EXCHANGE, 40);
pub const EXCHANGE_UNBIND_OK: MethodId = MethodId::new(CLASS_EXCHANGE, 51);

pub const QUEUE_DECLARE: MethodId = MethodId::new(CLASS_QUEUE, 10);
pub const QUEUE_DECLARE_OK: MethodId = MethodId::new(CLASS_QUEUE, 11);
pub const QUEUE_BIND: MethodId = MethodId::new(CLASS_QUEUE, 20);
pub const QUEUE_BIND_OK: MethodId = MethodId::new(CLASS_QUEUE, 21);
pub const QUEUE_PURGE: MethodId = MethodId::new(CLASS_QUEUE, 30);
pub const QUEUE_PURGE_OK: MethodId = MethodId::new(CLASS_QUEUE, 31);
pub const QUEUE_DELETE: MethodId = MethodId::new(CLASS_QUEUE, 40);
pub const QUEUE_DELETE_OK: MethodId = MethodId::new(CLASS_QUEUE, 41);
pub const QUEUE_UNBIND: MethodId = MethodId::new(CLASS_QUEUE, 50);
pub const QUEUE_UNBIND_OK: MethodId = MethodId::new(CLASS_QUEUE, 51);

pub const BASIC_QOS: MethodId = MethodId::new(CLASS_BASIC, 10);
pub const BASIC_QOS_OK: MethodId = MethodId::new(CLASS_BASIC, 11);
pub const BASIC_CONSUME: MethodId = MethodId::new(CLASS_BASIC, 20);
pub const BASIC_CONSUME_OK: MethodId = MethodId::new(CLASS_BASIC, 21);
pub const BASIC_CANCEL: MethodId = MethodId::new(CLASS_BASIC, 30);
pub const BASIC_CANCEL_OK: MethodId = MethodId::new(CLASS_BASIC, 31);
pub const BASIC_PUBLISH: MethodId = MethodId::new(CLASS_BASIC, 40);
pub const BASIC_RETURN: MethodId = MethodId::new(CLASS_BASIC, 50);
pub const BASIC_DELIVER: MethodId = MethodId::new(CLASS_BASIC, 60);
pub const BASIC_GET: MethodId = MethodId::new(CLASS_BASIC, 70);
pub const BASIC_GET_OK: MethodId = MethodId::new(CLASS_BASIC, 71);
pub const BASIC_GET_EMPTY: MethodId = MethodId::new(CLASS_BASIC, 72);
pub const BASIC_ACK: MethodId = MethodId::new(CLASS_BASIC, 80);
pub const BASIC_REJECT: MethodId = MethodId::new(CLASS_BASIC, 90);
pub const BASIC_RECOVER_ASYNC: MethodId = MethodId::new(CLASS_BASIC, 100);
pub const BASIC_RECOVER: MethodId = MethodId::new(CLASS_BASIC, 110);
pub const BASIC_RECOVER_OK: MethodId = MethodId::new(CLASS_BASIC, 111);
pub const BASIC_NACK: MethodId = MethodId::new(CLASS_BASIC, 120);

pub const CONFIRM_SELECT: MethodId = MethodId::new(CLASS_CONFIRM, 10);
pub const CONFIRM_SELECT_OK: MethodId = MethodId::new(CLASS_CONFIRM, 11);

pub const TX_SELECT: MethodId = MethodId::new(CLASS_TX, 10);
pub const TX_SELECT_OK: MethodId = MethodId::new(CLASS_TX, 11);
pub const TX_COMMIT: MethodId = MethodId::new(CLASS_TX, 20);
pub const TX_COMMIT_OK: MethodId = MethodId::new(CLASS_TX, 21);
pub const TX_ROLLBACK: MethodId = MethodId::new(CLASS_TX, 30);
pub const TX_ROLLBACK_OK: MethodId = MethodId::new(CLASS_TX, 31);

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStart {
    pub version_major: u8,
    pub version_minor: u8,
    pub server_properties: FieldTable,
    /// Space-separated SASL mechanism names.
    pub mechanisms: Bytes,
    /// Space-separated locale names.
    pub locales: Bytes,
}

#[derive(Clone, PartialEq)]
pub struct ConnectionStartOk {
    pub client_properties: FieldTable,
    pub mechanism: String,
    /// Opaque SASL response; redacted in debug output.
    pub response: Bytes,
    pub locale: String,
}

impl fmt::Debug for ConnectionStartOk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStartOk")
            .field("client_properties", &self.client_properties)
            .field("mechanism", &self.mechanism)
            .field(
                "response",
                &format_args!("<redacted:{} bytes>", self.response.len()),
            )
            .field("locale", &self.locale)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSecure {
    pub challenge: Bytes,
}

#[derive(Clone, PartialEq)]
pub struct ConnectionSecureOk {
    pub response: Bytes,
}

impl fmt::Debug for ConnectionSecureOk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSecureOk")
            .field(
                "response",
                &format_args!("<redacted:{} bytes>", self.response.len()),
            )
            .finish()
    }
}

/// Arguments of `connection.tune` and `connection.tune-ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tune {
    pub channel_max: u16,
    pub frame_max: u32,
    /// Seconds.
    pub heartbeat: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionOpen {
    pub virtual_host: String,
}

/// Arguments of `connection.close` and `channel.close`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Close {
    pub reply_code: u16,
    pub reply_text: String,
    /// The method that caused the close, or 0/0.
    pub class_id: u16,
    pub method_id: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionBlocked {
    pub reason: String,
}

/// Arguments of `channel.flow` and `channel.flow-ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelFlow {
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExchangeDeclare {
    pub exchange: String,
    /// `direct`, `fanout`, `topic`, `headers` or a plugin type.
    pub kind: String,
    pub passive: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExchangeDelete {
    pub exchange: String,
    pub if_unused: bool,
    pub no_wait: bool,
}

/// Arguments of `exchange.bind` and `exchange.unbind`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExchangeBind {
    pub destination: String,
    pub source: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueDeclare {
    /// Empty asks the broker to generate a name.
    pub queue: String,
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueDeclareOk {
    pub queue: String,
    pub message_count: u32,
    pub consumer_count: u32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueBind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueuePurge {
    pub queue: String,
    pub no_wait: bool,
}

/// Arguments of `queue.purge-ok` and `queue.delete-ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageCount {
    pub message_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueDelete {
    pub queue: String,
    pub if_unused: bool,
    pub if_empty: bool,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueueUnbind {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub arguments: FieldTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicQos {
    pub prefetch_size: u32,
    pub prefetch_count: u16,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BasicConsume {
    pub queue: String,
    pub consumer_tag: String,
    pub no_local: bool,
    pub no_ack: bool,
    pub exclusive: bool,
    pub no_wait: bool,
    pub arguments: FieldTable,
}

/// Arguments of `basic.consume-ok` and `basic.cancel-ok`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsumerTag {
    pub consumer_tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicCancel {
    pub consumer_tag: String,
    pub no_wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicPublish {
    pub exchange: String,
    pub routing_key: String,
    pub mandatory: bool,
    pub immediate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicReturn {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicDeliver {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicGet {
    pub queue: String,
    pub no_ack: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicGetOk {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub message_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicAck {
    pub delivery_tag: u64,
    pub multiple: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicReject {
    pub delivery_tag: u64,
    pub requeue: bool,
}

/// Arguments of `basic.recover` and `basic.recover-async`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicRecover {
    pub requeue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BasicNack {
    pub delivery_tag: u64,
    pub multiple: bool,
    pub requeue: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfirmSelect {
    pub no_wait: bool,
}

/// Every method of the schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Method {
    ConnectionStart(ConnectionStart),
    ConnectionStartOk(ConnectionStartOk),
    ConnectionSecure(ConnectionSecure),
    ConnectionSecureOk(ConnectionSecureOk),
    ConnectionTune(Tune),
    ConnectionTuneOk(Tune),
    ConnectionOpen(ConnectionOpen),
    ConnectionOpenOk,
    ConnectionClose(Close),
    ConnectionCloseOk,
    ConnectionBlocked(ConnectionBlocked),
    ConnectionUnblocked,

    ChannelOpen,
    ChannelOpenOk,
    ChannelFlow(ChannelFlow),
    ChannelFlowOk(ChannelFlow),
    ChannelClose(Close),
    ChannelCloseOk,

    ExchangeDeclare(ExchangeDeclare),
    ExchangeDeclareOk,
    ExchangeDelete(ExchangeDelete),
    ExchangeDeleteOk,
    ExchangeBind(ExchangeBind),
    ExchangeBindOk,
    ExchangeUnbind(ExchangeBind),
    ExchangeUnbindOk,

    QueueDeclare(QueueDeclare),
    QueueDeclareOk(QueueDeclareOk),
    QueueBind(QueueBind),
    QueueBindOk,
    QueuePurge(QueuePurge),
    QueuePurgeOk(MessageCount),
    QueueDelete(QueueDelete),
    QueueDeleteOk(MessageCount),
    QueueUnbind(QueueUnbind),
    QueueUnbindOk,

    BasicQos(BasicQos),
    BasicQosOk,
    BasicConsume(BasicConsume),
    BasicConsumeOk(ConsumerTag),
    BasicCancel(BasicCancel),
    BasicCancelOk(ConsumerTag),
    BasicPublish(BasicPublish),
    BasicReturn(BasicReturn),
    BasicDeliver(BasicDeliver),
    BasicGet(BasicGet),
    BasicGetOk(BasicGetOk),
    BasicGetEmpty,
    BasicAck(BasicAck),
    BasicReject(BasicReject),
    BasicRecoverAsync(BasicRecover),
    BasicRecover(BasicRecover),
    BasicRecoverOk,
    BasicNack(BasicNack),

    ConfirmSelect(ConfirmSelect),
    ConfirmSelectOk,

    TxSelect,
    TxSelectOk,
    TxCommit,
    TxCommitOk,
    TxRollback,
    TxRollbackOk,
}

impl Method {
    pub fn id(&self) -> MethodId {
        match self {
            Method::ConnectionStart(_) => CONNECTION_START,
            Method::ConnectionStartOk(_) => CONNECTION_START_OK,
            Method::ConnectionSecure(_) => CONNECTION_SECURE,
            Method::ConnectionSecureOk(_) => CONNECTION_SECURE_OK,
            Method::ConnectionTune(_) => CONNECTION_TUNE,
            Method::ConnectionTuneOk(_) => CONNECTION_TUNE_OK,
            Method::ConnectionOpen(_) => CONNECTION_OPEN,
            Method::ConnectionOpenOk => CONNECTION_OPEN_OK,
            Method::ConnectionClose(_) => CONNECTION_CLOSE,
            Method::ConnectionCloseOk => CONNECTION_CLOSE_OK,
            Method::ConnectionBlocked(_) => CONNECTION_BLOCKED,
            Method::ConnectionUnblocked => CONNECTION_UNBLOCKED,
            Method::ChannelOpen => CHANNEL_OPEN,
            Method::ChannelOpenOk => CHANNEL_OPEN_OK,
            Method::ChannelFlow(_) => CHANNEL_FLOW,
            Method::ChannelFlowOk(_) => CHANNEL_FLOW_OK,
            Method::ChannelClose(_) => CHANNEL_CLOSE,
            Method::ChannelCloseOk => CHANNEL_CLOSE_OK,
            Method::ExchangeDeclare(_) => EXCHANGE_DECLARE,
            Method::ExchangeDeclareOk => EXCHANGE_DECLARE_OK,
            Method::ExchangeDelete(_) => EXCHANGE_DELETE,
            Method::ExchangeDeleteOk => EXCHANGE_DELETE_OK,
            Method::ExchangeBind(_) => EXCHANGE_BIND,
            Method::ExchangeBindOk => EXCHANGE_BIND_OK,
            Method::ExchangeUnbind(_) => EXCHANGE_UNBIND,
            Method::ExchangeUnbindOk => EXCHANGE_UNBIND_OK,
            Method::QueueDeclare(_) => QUEUE_DECLARE,
            Method::QueueDeclareOk(_) => QUEUE_DECLARE_OK,
            Method::QueueBind(_) => QUEUE_BIND,
            Method::QueueBindOk => QUEUE_BIND_OK,
            Method::QueuePurge(_) => QUEUE_PURGE,
            Method::QueuePurgeOk(_) => QUEUE_PURGE_OK,
            Method::QueueDelete(_) => QUEUE_DELETE,
            Method::QueueDeleteOk(_) => QUEUE_DELETE_OK,
            Method::QueueUnbind(_) => QUEUE_UNBIND,
            Method::QueueUnbindOk => QUEUE_UNBIND_OK,
            Method::BasicQos(_) => BASIC_QOS,
            Method::BasicQosOk => BASIC_QOS_OK,
            Method::BasicConsume(_) => BASIC_CONSUME,
            Method::BasicConsumeOk(_) => BASIC_CONSUME_OK,
            Method::BasicCancel(_) => BASIC_CANCEL,
            Method::BasicCancelOk(_) => BASIC_CANCEL_OK,
            Method::BasicPublish(_) => BASIC_PUBLISH,
            Method::BasicReturn(_) => BASIC_RETURN,
            Method::BasicDeliver(_) => BASIC_DELIVER,
            Method::BasicGet(_) => BASIC_GET,
            Method::BasicGetOk(_) => BASIC_GET_OK,
            Method::BasicGetEmpty => BASIC_GET_EMPTY,
            Method::BasicAck(_) => BASIC_ACK,
            Method::BasicReject(_) => BASIC_REJECT,
            Method::BasicRecoverAsync(_) => BASIC_RECOVER_ASYNC,
            Method::BasicRecover(_) => BASIC_RECOVER,
            Method::BasicRecoverOk => BASIC_RECOVER_OK,
            Method::BasicNack(_) => BASIC_NACK,
            Method::ConfirmSelect(_) => CONFIRM_SELECT,
            Method::ConfirmSelectOk => CONFIRM_SELECT_OK,
            Method::TxSelect => TX_SELECT,
            Method::TxSelectOk => TX_SELECT_OK,
            Method::TxCommit => TX_COMMIT,
            Method::TxCommitOk => TX_COMMIT_OK,
            Method::TxRollback => TX_ROLLBACK,
            Method::TxRollbackOk => TX_ROLLBACK_OK,
        }
    }

    /// Whether a content header and body frames follow this method.
    pub fn has_content(&self) -> bool {
        matches!(
            self,
            Method::BasicPublish(_)
                | Method::BasicReturn(_)
                | Method::BasicDeliver(_)
                | Method::BasicGetOk(_)
        )
    }

    /// The replies that complete this method when a client sends it.
    ///
    /// Empty for asynchronous methods and for requests sent with `no_wait`.
    pub fn expected_replies(&self) -> &'static [MethodId] {
        match self {
            Method::ChannelOpen => &[CHANNEL_OPEN_OK],
            Method::ChannelFlow(_) => &[CHANNEL_FLOW_OK],
            Method::ChannelClose(_) => &[CHANNEL_CLOSE_OK],
            Method::ExchangeDeclare(m) if !m.no_wait => &[EXCHANGE_DECLARE_OK],
            Method::ExchangeDelete(m) if !m.no_wait => &[EXCHANGE_DELETE_OK],
            Method::ExchangeBind(m) if !m.no_wait => &[EXCHANGE_BIND_OK],
            Method::ExchangeUnbind(m) if !m.no_wait => &[EXCHANGE_UNBIND_OK],
            Method::QueueDeclare(m) if !m.no_wait => &[QUEUE_DECLARE_OK],
            Method::QueueBind(m) if !m.no_wait => &[QUEUE_BIND_OK],
            Method::QueuePurge(m) if !m.no_wait => &[QUEUE_PURGE_OK],
            Method::QueueDelete(m) if !m.no_wait => &[QUEUE_DELETE_OK],
            Method::QueueUnbind(_) => &[QUEUE_UNBIND_OK],
            Method::BasicQos(_) => &[BASIC_QOS_OK],
            Method::BasicConsume(m) if !m.no_wait => &[BASIC_CONSUME_OK],
            Method::BasicCancel(m) if !m.no_wait => &[BASIC_CANCEL_OK],
            Method::BasicGet(_) => &[BASIC_GET_OK, BASIC_GET_EMPTY],
            Method::BasicRecover(_) => &[BASIC_RECOVER_OK],
            Method::ConfirmSelect(m) if !m.no_wait => &[CONFIRM_SELECT_OK],
            Method::TxSelect => &[TX_SELECT_OK],
            Method::TxCommit => &[TX_COMMIT_OK],
            Method::TxRollback => &[TX_ROLLBACK_OK],
            _ => &[],
        }
    }

    /// Encode `class-id`, `method-id` and the arguments.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        let id = self.id();
        dst.put_u16(id.class_id);
        dst.put_u16(id.method_id);
        match self {
            Method::ConnectionStart(m) => {
                dst.put_u8(m.version_major);
                dst.put_u8(m.version_minor);
                m.server_properties.encode(dst)?;
                put_long_string(dst, &m.mechanisms)?;
                put_long_string(dst, &m.locales)?;
            }
            Method::ConnectionStartOk(m) => {
                m.client_properties.encode(dst)?;
                put_short_string(dst, &m.mechanism)?;
                put_long_string(dst, &m.response)?;
                put_short_string(dst, &m.locale)?;
            }
            Method::ConnectionSecure(m) => put_long_string(dst, &m.challenge)?,
            Method::ConnectionSecureOk(m) => put_long_string(dst, &m.response)?,
            Method::ConnectionTune(m) | Method::ConnectionTuneOk(m) => {
                dst.put_u16(m.channel_max);
                dst.put_u32(m.frame_max);
                dst.put_u16(m.heartbeat);
            }
            Method::ConnectionOpen(m) => {
                put_short_string(dst, &m.virtual_host)?;
                // capabilities (reserved), insist (reserved)
                put_short_string(dst, "")?;
                dst.put_u8(0);
            }
            Method::ConnectionOpenOk => put_short_string(dst, "")?,
            Method::ConnectionClose(m) | Method::ChannelClose(m) => {
                dst.put_u16(m.reply_code);
                put_short_string(dst, &m.reply_text)?;
                dst.put_u16(m.class_id);
                dst.put_u16(m.method_id);
            }
            Method::ConnectionBlocked(m) => put_short_string(dst, &m.reason)?,
            Method::ChannelOpen => put_short_string(dst, "")?,
            Method::ChannelOpenOk => put_long_string(dst, b"")?,
            Method::ChannelFlow(m) | Method::ChannelFlowOk(m) => dst.put_u8(bits(&[m.active])),
            Method::ExchangeDeclare(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.kind)?;
                dst.put_u8(bits(&[
                    m.passive,
                    m.durable,
                    m.auto_delete,
                    m.internal,
                    m.no_wait,
                ]));
                m.arguments.encode(dst)?;
            }
            Method::ExchangeDelete(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.exchange)?;
                dst.put_u8(bits(&[m.if_unused, m.no_wait]));
            }
            Method::ExchangeBind(m) | Method::ExchangeUnbind(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.destination)?;
                put_short_string(dst, &m.source)?;
                put_short_string(dst, &m.routing_key)?;
                dst.put_u8(bits(&[m.no_wait]));
                m.arguments.encode(dst)?;
            }
            Method::QueueDeclare(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                dst.put_u8(bits(&[
                    m.passive,
                    m.durable,
                    m.exclusive,
                    m.auto_delete,
                    m.no_wait,
                ]));
                m.arguments.encode(dst)?;
            }
            Method::QueueDeclareOk(m) => {
                put_short_string(dst, &m.queue)?;
                dst.put_u32(m.message_count);
                dst.put_u32(m.consumer_count);
            }
            Method::QueueBind(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
                dst.put_u8(bits(&[m.no_wait]));
                m.arguments.encode(dst)?;
            }
            Method::QueuePurge(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                dst.put_u8(bits(&[m.no_wait]));
            }
            Method::QueuePurgeOk(m) | Method::QueueDeleteOk(m) => dst.put_u32(m.message_count),
            Method::QueueDelete(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                dst.put_u8(bits(&[m.if_unused, m.if_empty, m.no_wait]));
            }
            Method::QueueUnbind(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
                m.arguments.encode(dst)?;
            }
            Method::BasicQos(m) => {
                dst.put_u32(m.prefetch_size);
                dst.put_u16(m.prefetch_count);
                dst.put_u8(bits(&[m.global]));
            }
            Method::BasicConsume(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                put_short_string(dst, &m.consumer_tag)?;
                dst.put_u8(bits(&[m.no_local, m.no_ack, m.exclusive, m.no_wait]));
                m.arguments.encode(dst)?;
            }
            Method::BasicConsumeOk(m) | Method::BasicCancelOk(m) => {
                put_short_string(dst, &m.consumer_tag)?
            }
            Method::BasicCancel(m) => {
                put_short_string(dst, &m.consumer_tag)?;
                dst.put_u8(bits(&[m.no_wait]));
            }
            Method::BasicPublish(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
                dst.put_u8(bits(&[m.mandatory, m.immediate]));
            }
            Method::BasicReturn(m) => {
                dst.put_u16(m.reply_code);
                put_short_string(dst, &m.reply_text)?;
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
            }
            Method::BasicDeliver(m) => {
                put_short_string(dst, &m.consumer_tag)?;
                dst.put_u64(m.delivery_tag);
                dst.put_u8(bits(&[m.redelivered]));
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
            }
            Method::BasicGet(m) => {
                dst.put_u16(0);
                put_short_string(dst, &m.queue)?;
                dst.put_u8(bits(&[m.no_ack]));
            }
            Method::BasicGetOk(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(bits(&[m.redelivered]));
                put_short_string(dst, &m.exchange)?;
                put_short_string(dst, &m.routing_key)?;
                dst.put_u32(m.message_count);
            }
            Method::BasicGetEmpty => put_short_string(dst, "")?,
            Method::BasicAck(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(bits(&[m.multiple]));
            }
            Method::BasicReject(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(bits(&[m.requeue]));
            }
            Method::BasicRecoverAsync(m) | Method::BasicRecover(m) => {
                dst.put_u8(bits(&[m.requeue]))
            }
            Method::BasicNack(m) => {
                dst.put_u64(m.delivery_tag);
                dst.put_u8(bits(&[m.multiple, m.requeue]));
            }
            Method::ConfirmSelect(m) => dst.put_u8(bits(&[m.no_wait])),
            Method::ConnectionCloseOk
            | Method::ConnectionUnblocked
            | Method::ChannelCloseOk
            | Method::ExchangeDeclareOk
            | Method::ExchangeDeleteOk
            | Method::ExchangeBindOk
            | Method::ExchangeUnbindOk
            | Method::QueueBindOk
            | Method::QueueUnbindOk
            | Method::BasicQosOk
            | Method::BasicRecoverOk
            | Method::ConfirmSelectOk
            | Method::TxSelect
            | Method::TxSelectOk
            | Method::TxCommit
            | Method::TxCommitOk
            | Method::TxRollback
            | Method::TxRollbackOk => {}
        }
        Ok(())
    }

    /// Decode a whole method-frame payload.
    pub fn decode(mut src: Decoder) -> Result<Self> {
        let id = MethodId::new(src.u16()?, src.u16()?);
        let method = match id {
            CONNECTION_START => Method::ConnectionStart(ConnectionStart {
                version_major: src.u8()?,
                version_minor: src.u8()?,
                server_properties: FieldTable::decode(&mut src)?,
                mechanisms: src.long_string()?,
                locales: src.long_string()?,
            }),
            CONNECTION_START_OK => Method::ConnectionStartOk(ConnectionStartOk {
                client_properties: FieldTable::decode(&mut src)?,
                mechanism: src.short_string()?,
                response: src.long_string()?,
                locale: src.short_string()?,
            }),
            CONNECTION_SECURE => Method::ConnectionSecure(ConnectionSecure {
                challenge: src.long_string()?,
            }),
            CONNECTION_SECURE_OK => Method::ConnectionSecureOk(ConnectionSecureOk {
                response: src.long_string()?,
            }),
            CONNECTION_TUNE => Method::ConnectionTune(decode_tune(&mut src)?),
            CONNECTION_TUNE_OK => Method::ConnectionTuneOk(decode_tune(&mut src)?),
            CONNECTION_OPEN => {
                let virtual_host = src.short_string()?;
                let _capabilities = src.short_string()?;
                let _insist = src.u8()?;
                Method::ConnectionOpen(ConnectionOpen { virtual_host })
            }
            CONNECTION_OPEN_OK => {
                let _known_hosts = src.short_string()?;
                Method::ConnectionOpenOk
            }
            CONNECTION_CLOSE => Method::ConnectionClose(decode_close(&mut src)?),
            CONNECTION_CLOSE_OK => Method::ConnectionCloseOk,
            CONNECTION_BLOCKED => Method::ConnectionBlocked(ConnectionBlocked {
                reason: src.short_string()?,
            }),
            CONNECTION_UNBLOCKED => Method::ConnectionUnblocked,
            CHANNEL_OPEN => {
                let _out_of_band = src.short_string()?;
                Method::ChannelOpen
            }
            CHANNEL_OPEN_OK => {
                let _channel_id = src.long_string()?;
                Method::ChannelOpenOk
            }
            CHANNEL_FLOW => Method::ChannelFlow(ChannelFlow {
                active: flag(src.u8()?, 0),
            }),
            CHANNEL_FLOW_OK => Method::ChannelFlowOk(ChannelFlow {
                active: flag(src.u8()?, 0),
            }),
            CHANNEL_CLOSE => Method::ChannelClose(decode_close(&mut src)?),
            CHANNEL_CLOSE_OK => Method::ChannelCloseOk,
            EXCHANGE_DECLARE => {
                let _ticket = src.u16()?;
                let exchange = src.short_string()?;
                let kind = src.short_string()?;
                let b = src.u8()?;
                Method::ExchangeDeclare(ExchangeDeclare {
                    exchange,
                    kind,
                    passive: flag(b, 0),
                    durable: flag(b, 1),
                    auto_delete: flag(b, 2),
                    internal: flag(b, 3),
                    no_wait: flag(b, 4),
                    arguments: FieldTable::decode(&mut src)?,
                })
            }
            EXCHANGE_DECLARE_OK => Method::ExchangeDeclareOk,
            EXCHANGE_DELETE => {
                let _ticket = src.u16()?;
                let exchange = src.short_string()?;
                let b = src.u8()?;
                Method::ExchangeDelete(ExchangeDelete {
                    exchange,
                    if_unused: flag(b, 0),
                    no_wait: flag(b, 1),
                })
            }
            EXCHANGE_DELETE_OK => Method::ExchangeDeleteOk,
            EXCHANGE_BIND => Method::ExchangeBind(decode_exchange_bind(&mut src)?),
            EXCHANGE_BIND_OK => Method::ExchangeBindOk,
            EXCHANGE_UNBIND => Method::ExchangeUnbind(decode_exchange_bind(&mut src)?),
            EXCHANGE_UNBIND_OK => Method::ExchangeUnbindOk,
            QUEUE_DECLARE => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let b = src.u8()?;
                Method::QueueDeclare(QueueDeclare {
                    queue,
                    passive: flag(b, 0),
                    durable: flag(b, 1),
                    exclusive: flag(b, 2),
                    auto_delete: flag(b, 3),
                    no_wait: flag(b, 4),
                    arguments: FieldTable::decode(&mut src)?,
                })
            }
            QUEUE_DECLARE_OK => Method::QueueDeclareOk(QueueDeclareOk {
                queue: src.short_string()?,
                message_count: src.u32()?,
                consumer_count: src.u32()?,
            }),
            QUEUE_BIND => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let exchange = src.short_string()?;
                let routing_key = src.short_string()?;
                let b = src.u8()?;
                Method::QueueBind(QueueBind {
                    queue,
                    exchange,
                    routing_key,
                    no_wait: flag(b, 0),
                    arguments: FieldTable::decode(&mut src)?,
                })
            }
            QUEUE_BIND_OK => Method::QueueBindOk,
            QUEUE_PURGE => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let b = src.u8()?;
                Method::QueuePurge(QueuePurge {
                    queue,
                    no_wait: flag(b, 0),
                })
            }
            QUEUE_PURGE_OK => Method::QueuePurgeOk(MessageCount {
                message_count: src.u32()?,
            }),
            QUEUE_DELETE => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let b = src.u8()?;
                Method::QueueDelete(QueueDelete {
                    queue,
                    if_unused: flag(b, 0),
                    if_empty: flag(b, 1),
                    no_wait: flag(b, 2),
                })
            }
            QUEUE_DELETE_OK => Method::QueueDeleteOk(MessageCount {
                message_count: src.u32()?,
            }),
            QUEUE_UNBIND => {
                let _ticket = src.u16()?;
                Method::QueueUnbind(QueueUnbind {
                    queue: src.short_string()?,
                    exchange: src.short_string()?,
                    routing_key: src.short_string()?,
                    arguments: FieldTable::decode(&mut src)?,
                })
            }
            QUEUE_UNBIND_OK => Method::QueueUnbindOk,
            BASIC_QOS => {
                let prefetch_size = src.u32()?;
                let prefetch_count = src.u16()?;
                let b = src.u8()?;
                Method::BasicQos(BasicQos {
                    prefetch_size,
                    prefetch_count,
                    global: flag(b, 0),
                })
            }
            BASIC_QOS_OK => Method::BasicQosOk,
            BASIC_CONSUME => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let consumer_tag = src.short_string()?;
                let b = src.u8()?;
                Method::BasicConsume(BasicConsume {
                    queue,
                    consumer_tag,
                    no_local: flag(b, 0),
                    no_ack: flag(b, 1),
                    exclusive: flag(b, 2),
                    no_wait: flag(b, 3),
                    arguments: FieldTable::decode(&mut src)?,
                })
            }
            BASIC_CONSUME_OK => Method::BasicConsumeOk(ConsumerTag {
                consumer_tag: src.short_string()?,
            }),
            BASIC_CANCEL => {
                let consumer_tag = src.short_string()?;
                let b = src.u8()?;
                Method::BasicCancel(BasicCancel {
                    consumer_tag,
                    no_wait: flag(b, 0),
                })
            }
            BASIC_CANCEL_OK => Method::BasicCancelOk(ConsumerTag {
                consumer_tag: src.short_string()?,
            }),
            BASIC_PUBLISH => {
                let _ticket = src.u16()?;
                let exchange = src.short_string()?;
                let routing_key = src.short_string()?;
                let b = src.u8()?;
                Method::BasicPublish(BasicPublish {
                    exchange,
                    routing_key,
                    mandatory: flag(b, 0),
                    immediate: flag(b, 1),
                })
            }
            BASIC_RETURN => Method::BasicReturn(BasicReturn {
                reply_code: src.u16()?,
                reply_text: src.short_string()?,
                exchange: src.short_string()?,
                routing_key: src.short_string()?,
            }),
            BASIC_DELIVER => Method::BasicDeliver(BasicDeliver {
                consumer_tag: src.short_string()?,
                delivery_tag: src.u64()?,
                redelivered: flag(src.u8()?, 0),
                exchange: src.short_string()?,
                routing_key: src.short_string()?,
            }),
            BASIC_GET => {
                let _ticket = src.u16()?;
                let queue = src.short_string()?;
                let b = src.u8()?;
                Method::BasicGet(BasicGet {
                    queue,
                    no_ack: flag(b, 0),
                })
            }
            BASIC_GET_OK => Method::BasicGetOk(BasicGetOk {
                delivery_tag: src.u64()?,
                redelivered: flag(src.u8()?, 0),
                exchange: src.short_string()?,
                routing_key: src.short_string()?,
                message_count: src.u32()?,
            }),
            BASIC_GET_EMPTY => {
                let _cluster_id = src.short_string()?;
                Method::BasicGetEmpty
            }
            BASIC_ACK => {
                let delivery_tag = src.u64()?;
                let b = src.u8()?;
                Method::BasicAck(BasicAck {
                    delivery_tag,
                    multiple: flag(b, 0),
                })
            }
            BASIC_REJECT => {
                let delivery_tag = src.u64()?;
                let b = src.u8()?;
                Method::BasicReject(BasicReject {
                    delivery_tag,
                    requeue: flag(b, 0),
                })
            }
            BASIC_RECOVER_ASYNC => Method::BasicRecoverAsync(BasicRecover {
                requeue: flag(src.u8()?, 0),
            }),
            BASIC_RECOVER => Method::BasicRecover(BasicRecover {
                requeue: flag(src.u8()?, 0),
            }),
            BASIC_RECOVER_OK => Method::BasicRecoverOk,
            BASIC_NACK => {
                let delivery_tag = src.u64()?;
                let b = src.u8()?;
                Method::BasicNack(BasicNack {
                    delivery_tag,
                    multiple: flag(b, 0),
                    requeue: flag(b, 1),
                })
            }
            CONFIRM_SELECT => Method::ConfirmSelect(ConfirmSelect {
                no_wait: flag(src.u8()?, 0),
            }),
            CONFIRM_SELECT_OK => Method::ConfirmSelectOk,
            TX_SELECT => Method::TxSelect,
            TX_SELECT_OK => Method::TxSelectOk,
            TX_COMMIT => Method::TxCommit,
            TX_COMMIT_OK => Method::TxCommitOk,
            TX_ROLLBACK => Method::TxRollback,
            TX_ROLLBACK_OK => Method::TxRollbackOk,
            MethodId {
                class_id,
                method_id,
            } => {
                return Err(FrameError::UnknownMethod {
                    class_id,
                    method_id,
                })
            }
        };
        src.finish("method arguments")?;
        Ok(method)
    }
}

/// Pack consecutive bit arguments into one octet, first argument in the low bit.
fn bits(values: &[bool]) -> u8 {
    values
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, v)| if *v { acc | (1 << i) } else { acc })
}

fn flag(octet: u8, bit: u8) -> bool {
    octet & (1 << bit) != 0
}

fn decode_tune(src: &mut Decoder) -> Result<Tune> {
    Ok(Tune {
        channel_max: src.u16()?,
        frame_max: src.u32()?,
        heartbeat: src.u16()?,
    })
}

fn decode_close(src: &mut Decoder) -> Result<Close> {
    Ok(Close {
        reply_code: src.u16()?,
        reply_text: src.short_string()?,
        class_id: src.u16()?,
        method_id: src.u16()?,
    })
}

fn decode_exchange_bind(src: &mut Decoder) -> Result<ExchangeBind> {
    let _ticket = src.u16()?;
    let destination = src.short_string()?;
    let source = src.short_string()?;
    let routing_key = src.short_string()?;
    let b = src.u8()?;
    Ok(ExchangeBind {
        destination,
        source,
        routing_key,
        no_wait: flag(b, 0),
        arguments: FieldTable::decode(src)?,
    })
}
