//! Seeded generator of codec values for round-trip testing.
//!
//! Compiled for this crate's tests and, behind the `arbitrary` feature, for
//! downstream crates that want the same values in their own tests.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::field::{Decimal, FieldTable, FieldValue, MAX_NESTING_DEPTH};
use crate::method::{
    BasicAck, BasicCancel, BasicConsume, BasicDeliver, BasicGet, BasicGetOk, BasicNack,
    BasicPublish, BasicQos, BasicRecover, BasicReject, BasicReturn, ChannelFlow, Close,
    ConfirmSelect, ConnectionBlocked, ConnectionOpen, ConnectionSecure, ConnectionSecureOk,
    ConnectionStart, ConnectionStartOk, ConsumerTag, ExchangeBind, ExchangeDeclare,
    ExchangeDelete, MessageCount, Method, QueueBind, QueueDeclare, QueueDeclareOk, QueueDelete,
    QueuePurge, QueueUnbind, Tune,
};
use crate::properties::BasicProperties;

const MAX_TABLE_ENTRIES: usize = 6;
const MAX_ARRAY_LEN: usize = 5;

/// Number of [`Method`] variants [`Generator::method`] draws from.
pub const METHOD_KINDS: usize = 62;

/// Deterministic source of field values, tables, properties and methods.
pub struct Generator {
    rng: StdRng,
    max_depth: usize,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_depth: 3,
        }
    }

    /// Limit table/array nesting; capped at [`MAX_NESTING_DEPTH`].
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.min(MAX_NESTING_DEPTH);
        self
    }

    pub fn short_string(&mut self) -> String {
        let len = self.rng.gen_range(0..=24);
        (0..len)
            .map(|_| char::from(self.rng.gen_range(b'a'..=b'z')))
            .collect()
    }

    fn opt_string(&mut self) -> Option<String> {
        self.rng.gen_bool(0.5).then(|| self.short_string())
    }

    fn bytes(&mut self) -> Bytes {
        let len = self.rng.gen_range(0..=32);
        Bytes::from((0..len).map(|_| self.rng.gen::<u8>()).collect::<Vec<_>>())
    }

    pub fn field_value(&mut self) -> FieldValue {
        self.value_at(0)
    }

    pub fn field_table(&mut self) -> FieldTable {
        self.table_at(0)
    }

    fn value_at(&mut self, depth: usize) -> FieldValue {
        let kinds = if depth < self.max_depth { 17 } else { 15 };
        match self.rng.gen_range(0..kinds) {
            0 => FieldValue::Bool(self.rng.gen()),
            1 => FieldValue::I8(self.rng.gen()),
            2 => FieldValue::U8(self.rng.gen()),
            3 => FieldValue::I16(self.rng.gen()),
            4 => FieldValue::U16(self.rng.gen()),
            5 => FieldValue::I32(self.rng.gen()),
            6 => FieldValue::U32(self.rng.gen()),
            7 => FieldValue::I64(self.rng.gen()),
            // finite values only, NaN never compares equal
            8 => FieldValue::F32(self.rng.gen_range(-1.0e6..1.0e6)),
            9 => FieldValue::F64(self.rng.gen_range(-1.0e12..1.0e12)),
            10 => FieldValue::Decimal(Decimal::new(self.rng.gen(), self.rng.gen())),
            11 => FieldValue::LongString(self.bytes()),
            12 => FieldValue::ByteArray(self.bytes()),
            13 => FieldValue::Timestamp(self.rng.gen()),
            14 => FieldValue::Void,
            15 => {
                let len = self.rng.gen_range(0..=MAX_ARRAY_LEN);
                FieldValue::Array((0..len).map(|_| self.value_at(depth + 1)).collect())
            }
            _ => FieldValue::Table(self.table_at(depth + 1)),
        }
    }

    fn table_at(&mut self, depth: usize) -> FieldTable {
        let len = self.rng.gen_range(0..=MAX_TABLE_ENTRIES);
        (0..len)
            .map(|i| (format!("{}{i}", self.short_string()), self.value_at(depth)))
            .collect()
    }

    pub fn properties(&mut self) -> BasicProperties {
        BasicProperties {
            content_type: self.opt_string(),
            content_encoding: self.opt_string(),
            headers: self.rng.gen_bool(0.5).then(|| self.field_table()),
            delivery_mode: self.rng.gen_bool(0.5).then(|| self.rng.gen_range(1..=2)),
            priority: self.rng.gen_bool(0.5).then(|| self.rng.gen_range(0..=9)),
            correlation_id: self.opt_string(),
            reply_to: self.opt_string(),
            expiration: self.opt_string(),
            message_id: self.opt_string(),
            timestamp: self.rng.gen_bool(0.5).then(|| self.rng.gen()),
            kind: self.opt_string(),
            user_id: self.opt_string(),
            app_id: self.opt_string(),
            cluster_id: self.opt_string(),
        }
    }

    /// A method of any kind in the schema.
    pub fn method(&mut self) -> Method {
        let kind = self.rng.gen_range(0..METHOD_KINDS);
        self.method_of_kind(kind)
    }

    fn close(&mut self) -> Close {
        Close {
            reply_code: self.rng.gen(),
            reply_text: self.short_string(),
            class_id: self.rng.gen(),
            method_id: self.rng.gen(),
        }
    }

    fn tune(&mut self) -> Tune {
        Tune {
            channel_max: self.rng.gen(),
            frame_max: self.rng.gen(),
            heartbeat: self.rng.gen(),
        }
    }

    fn exchange_bind(&mut self) -> ExchangeBind {
        ExchangeBind {
            destination: self.short_string(),
            source: self.short_string(),
            routing_key: self.short_string(),
            no_wait: self.rng.gen(),
            arguments: self.field_table(),
        }
    }

    fn consumer_tag(&mut self) -> ConsumerTag {
        ConsumerTag {
            consumer_tag: self.short_string(),
        }
    }

    fn message_count(&mut self) -> MessageCount {
        MessageCount {
            message_count: self.rng.gen(),
        }
    }

    /// Kinds are numbered in schema order, `0..METHOD_KINDS`; anything past
    /// the end is `tx.rollback-ok`.
    pub fn method_of_kind(&mut self, kind: usize) -> Method {
        match kind {
            0 => Method::ConnectionStart(ConnectionStart {
                version_major: self.rng.gen(),
                version_minor: self.rng.gen(),
                server_properties: self.field_table(),
                mechanisms: self.bytes(),
                locales: self.bytes(),
            }),
            1 => Method::ConnectionStartOk(ConnectionStartOk {
                client_properties: self.field_table(),
                mechanism: self.short_string(),
                response: self.bytes(),
                locale: self.short_string(),
            }),
            2 => Method::ConnectionSecure(ConnectionSecure {
                challenge: self.bytes(),
            }),
            3 => Method::ConnectionSecureOk(ConnectionSecureOk {
                response: self.bytes(),
            }),
            4 => Method::ConnectionTune(self.tune()),
            5 => Method::ConnectionTuneOk(self.tune()),
            6 => Method::ConnectionOpen(ConnectionOpen {
                virtual_host: self.short_string(),
            }),
            7 => Method::ConnectionOpenOk,
            8 => Method::ConnectionClose(self.close()),
            9 => Method::ConnectionCloseOk,
            10 => Method::ConnectionBlocked(ConnectionBlocked {
                reason: self.short_string(),
            }),
            11 => Method::ConnectionUnblocked,

            12 => Method::ChannelOpen,
            13 => Method::ChannelOpenOk,
            14 => Method::ChannelFlow(ChannelFlow {
                active: self.rng.gen(),
            }),
            15 => Method::ChannelFlowOk(ChannelFlow {
                active: self.rng.gen(),
            }),
            16 => Method::ChannelClose(self.close()),
            17 => Method::ChannelCloseOk,

            18 => Method::ExchangeDeclare(ExchangeDeclare {
                exchange: self.short_string(),
                kind: self.short_string(),
                passive: self.rng.gen(),
                durable: self.rng.gen(),
                auto_delete: self.rng.gen(),
                internal: self.rng.gen(),
                no_wait: self.rng.gen(),
                arguments: self.field_table(),
            }),
            19 => Method::ExchangeDeclareOk,
            20 => Method::ExchangeDelete(ExchangeDelete {
                exchange: self.short_string(),
                if_unused: self.rng.gen(),
                no_wait: self.rng.gen(),
            }),
            21 => Method::ExchangeDeleteOk,
            22 => Method::ExchangeBind(self.exchange_bind()),
            23 => Method::ExchangeBindOk,
            24 => Method::ExchangeUnbind(self.exchange_bind()),
            25 => Method::ExchangeUnbindOk,

            26 => Method::QueueDeclare(QueueDeclare {
                queue: self.short_string(),
                passive: self.rng.gen(),
                durable: self.rng.gen(),
                exclusive: self.rng.gen(),
                auto_delete: self.rng.gen(),
                no_wait: self.rng.gen(),
                arguments: self.field_table(),
            }),
            27 => Method::QueueDeclareOk(QueueDeclareOk {
                queue: self.short_string(),
                message_count: self.rng.gen(),
                consumer_count: self.rng.gen(),
            }),
            28 => Method::QueueBind(QueueBind {
                queue: self.short_string(),
                exchange: self.short_string(),
                routing_key: self.short_string(),
                no_wait: self.rng.gen(),
                arguments: self.field_table(),
            }),
            29 => Method::QueueBindOk,
            30 => Method::QueuePurge(QueuePurge {
                queue: self.short_string(),
                no_wait: self.rng.gen(),
            }),
            31 => Method::QueuePurgeOk(self.message_count()),
            32 => Method::QueueDelete(QueueDelete {
                queue: self.short_string(),
                if_unused: self.rng.gen(),
                if_empty: self.rng.gen(),
                no_wait: self.rng.gen(),
            }),
            33 => Method::QueueDeleteOk(self.message_count()),
            34 => Method::QueueUnbind(QueueUnbind {
                queue: self.short_string(),
                exchange: self.short_string(),
                routing_key: self.short_string(),
                arguments: self.field_table(),
            }),
            35 => Method::QueueUnbindOk,

            36 => Method::BasicQos(BasicQos {
                prefetch_size: self.rng.gen(),
                prefetch_count: self.rng.gen(),
                global: self.rng.gen(),
            }),
            37 => Method::BasicQosOk,
            38 => Method::BasicConsume(BasicConsume {
                queue: self.short_string(),
                consumer_tag: self.short_string(),
                no_local: self.rng.gen(),
                no_ack: self.rng.gen(),
                exclusive: self.rng.gen(),
                no_wait: self.rng.gen(),
                arguments: self.field_table(),
            }),
            39 => Method::BasicConsumeOk(self.consumer_tag()),
            40 => Method::BasicCancel(BasicCancel {
                consumer_tag: self.short_string(),
                no_wait: self.rng.gen(),
            }),
            41 => Method::BasicCancelOk(self.consumer_tag()),
            42 => Method::BasicPublish(BasicPublish {
                exchange: self.short_string(),
                routing_key: self.short_string(),
                mandatory: self.rng.gen(),
                immediate: self.rng.gen(),
            }),
            43 => Method::BasicReturn(BasicReturn {
                reply_code: self.rng.gen(),
                reply_text: self.short_string(),
                exchange: self.short_string(),
                routing_key: self.short_string(),
            }),
            44 => Method::BasicDeliver(BasicDeliver {
                consumer_tag: self.short_string(),
                delivery_tag: self.rng.gen(),
                redelivered: self.rng.gen(),
                exchange: self.short_string(),
                routing_key: self.short_string(),
            }),
            45 => Method::BasicGet(BasicGet {
                queue: self.short_string(),
                no_ack: self.rng.gen(),
            }),
            46 => Method::BasicGetOk(BasicGetOk {
                delivery_tag: self.rng.gen(),
                redelivered: self.rng.gen(),
                exchange: self.short_string(),
                routing_key: self.short_string(),
                message_count: self.rng.gen(),
            }),
            47 => Method::BasicGetEmpty,
            48 => Method::BasicAck(BasicAck {
                delivery_tag: self.rng.gen(),
                multiple: self.rng.gen(),
            }),
            49 => Method::BasicReject(BasicReject {
                delivery_tag: self.rng.gen(),
                requeue: self.rng.gen(),
            }),
            50 => Method::BasicRecoverAsync(BasicRecover {
                requeue: self.rng.gen(),
            }),
            51 => Method::BasicRecover(BasicRecover {
                requeue: self.rng.gen(),
            }),
            52 => Method::BasicRecoverOk,
            53 => Method::BasicNack(BasicNack {
                delivery_tag: self.rng.gen(),
                multiple: self.rng.gen(),
                requeue: self.rng.gen(),
            }),

            54 => Method::ConfirmSelect(ConfirmSelect {
                no_wait: self.rng.gen(),
            }),
            55 => Method::ConfirmSelectOk,

            56 => Method::TxSelect,
            57 => Method::TxSelectOk,
            58 => Method::TxCommit,
            59 => Method::TxCommitOk,
            60 => Method::TxRollback,
            _ => Method::TxRollbackOk,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::buffer::Decoder;
    use crate::codec::{decode_frame, encode_frame, Frame};
    use crate::properties::ContentHeader;

    #[test]
    fn same_seed_same_values() {
        let a: Vec<_> = (0..20).map(|_| Generator::new(7).field_table()).collect();
        let b: Vec<_> = (0..20).map(|_| Generator::new(7).field_table()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn generated_tables_survive_the_wire() {
        for seed in 0..300 {
            let table = Generator::new(seed).field_table();
            let mut buf = BytesMut::new();
            table.encode(&mut buf).unwrap();
            let decoded = FieldTable::decode(&mut Decoder::new(buf.freeze())).unwrap();
            assert_eq!(decoded, table, "seed {seed}");
        }
    }

    #[test]
    fn generated_frames_survive_the_wire() {
        let mut wire = BytesMut::new();
        let mut expected = Vec::new();
        for seed in 0..200 {
            let mut gen = Generator::new(seed);
            let method = Frame::method(seed as u16, gen.method());
            let header = Frame::Header {
                channel: seed as u16,
                header: ContentHeader::basic(seed, gen.properties()),
            };
            encode_frame(&method, &mut wire).unwrap();
            encode_frame(&header, &mut wire).unwrap();
            expected.push(method);
            expected.push(header);
        }
        for frame in expected {
            assert_eq!(decode_frame(&mut wire, 0).unwrap().unwrap(), frame);
        }
        assert!(wire.is_empty());
    }

    /// Schema position of each variant. No wildcard arm, so a new variant
    /// fails to compile here until the generator knows about it.
    fn kind_of(method: &Method) -> usize {
        match method {
            Method::ConnectionStart(_) => 0,
            Method::ConnectionStartOk(_) => 1,
            Method::ConnectionSecure(_) => 2,
            Method::ConnectionSecureOk(_) => 3,
            Method::ConnectionTune(_) => 4,
            Method::ConnectionTuneOk(_) => 5,
            Method::ConnectionOpen(_) => 6,
            Method::ConnectionOpenOk => 7,
            Method::ConnectionClose(_) => 8,
            Method::ConnectionCloseOk => 9,
            Method::ConnectionBlocked(_) => 10,
            Method::ConnectionUnblocked => 11,
            Method::ChannelOpen => 12,
            Method::ChannelOpenOk => 13,
            Method::ChannelFlow(_) => 14,
            Method::ChannelFlowOk(_) => 15,
            Method::ChannelClose(_) => 16,
            Method::ChannelCloseOk => 17,
            Method::ExchangeDeclare(_) => 18,
            Method::ExchangeDeclareOk => 19,
            Method::ExchangeDelete(_) => 20,
            Method::ExchangeDeleteOk => 21,
            Method::ExchangeBind(_) => 22,
            Method::ExchangeBindOk => 23,
            Method::ExchangeUnbind(_) => 24,
            Method::ExchangeUnbindOk => 25,
            Method::QueueDeclare(_) => 26,
            Method::QueueDeclareOk(_) => 27,
            Method::QueueBind(_) => 28,
            Method::QueueBindOk => 29,
            Method::QueuePurge(_) => 30,
            Method::QueuePurgeOk(_) => 31,
            Method::QueueDelete(_) => 32,
            Method::QueueDeleteOk(_) => 33,
            Method::QueueUnbind(_) => 34,
            Method::QueueUnbindOk => 35,
            Method::BasicQos(_) => 36,
            Method::BasicQosOk => 37,
            Method::BasicConsume(_) => 38,
            Method::BasicConsumeOk(_) => 39,
            Method::BasicCancel(_) => 40,
            Method::BasicCancelOk(_) => 41,
            Method::BasicPublish(_) => 42,
            Method::BasicReturn(_) => 43,
            Method::BasicDeliver(_) => 44,
            Method::BasicGet(_) => 45,
            Method::BasicGetOk(_) => 46,
            Method::BasicGetEmpty => 47,
            Method::BasicAck(_) => 48,
            Method::BasicReject(_) => 49,
            Method::BasicRecoverAsync(_) => 50,
            Method::BasicRecover(_) => 51,
            Method::BasicRecoverOk => 52,
            Method::BasicNack(_) => 53,
            Method::ConfirmSelect(_) => 54,
            Method::ConfirmSelectOk => 55,
            Method::TxSelect => 56,
            Method::TxSelectOk => 57,
            Method::TxCommit => 58,
            Method::TxCommitOk => 59,
            Method::TxRollback => 60,
            Method::TxRollbackOk => 61,
        }
    }

    #[test]
    fn every_method_kind_survives_the_wire() {
        let mut wire = BytesMut::new();
        let mut expected = Vec::with_capacity(METHOD_KINDS * 4);
        for kind in 0..METHOD_KINDS {
            for seed in 0..4 {
                let method = Generator::new(seed).method_of_kind(kind);
                assert_eq!(kind_of(&method), kind);
                let frame = Frame::method(1, method);
                encode_frame(&frame, &mut wire).unwrap();
                expected.push(frame);
            }
        }
        for frame in expected {
            assert_eq!(decode_frame(&mut wire, 0).unwrap().unwrap(), frame);
        }
        assert!(wire.is_empty());
    }

    #[test]
    fn random_methods_reach_every_kind() {
        let mut gen = Generator::new(42);
        let mut seen = [false; METHOD_KINDS];
        for _ in 0..5_000 {
            seen[kind_of(&gen.method())] = true;
        }
        assert!(seen.iter().all(|hit| *hit));
    }

    #[test]
    fn depth_limit_is_respected() {
        fn depth(value: &FieldValue) -> usize {
            match value {
                FieldValue::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
                FieldValue::Table(t) => 1 + t.iter().map(|(_, v)| depth(v)).max().unwrap_or(0),
                _ => 0,
            }
        }
        for seed in 0..100 {
            let value = Generator::new(seed).with_max_depth(1).field_value();
            assert!(depth(&value) <= 1, "seed {seed}");
        }
    }
}
