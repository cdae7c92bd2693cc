use amqpwire_frame::method::{BasicDeliver, BasicGetOk, BasicReturn};
use amqpwire_frame::ContentHeader;
use bytes::{Bytes, BytesMut};

use crate::delivery::{Delivery, GetMessage, Return};
use crate::error::{AmqpError, UNEXPECTED_FRAME};

/// A content-bearing method waiting for its header and body.
#[derive(Debug)]
pub(crate) enum ContentMethod {
    Deliver(BasicDeliver),
    Return(BasicReturn),
    GetOk(BasicGetOk),
}

/// A fully reassembled message.
#[derive(Debug)]
pub(crate) enum Content {
    Deliver(Delivery),
    Return(Return),
    GetOk(GetMessage),
}

#[derive(Debug)]
struct InProgress {
    method: ContentMethod,
    header: Option<ContentHeader>,
    body: BytesMut,
}

/// Collects method, header, and body frames into one message.
///
/// At most one message is in flight per channel. Any frame out of sequence is
/// a channel-level `UNEXPECTED_FRAME` error.
#[derive(Debug, Default)]
pub(crate) struct Assembler {
    current: Option<InProgress>,
}

type Step = Result<Option<Content>, AmqpError>;

impl Assembler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.current.is_some()
    }

    pub(crate) fn reset(&mut self) {
        self.current = None;
    }

    pub(crate) fn start(&mut self, method: ContentMethod) -> Result<(), AmqpError> {
        if self.current.is_some() {
            self.current = None;
            return Err(unexpected("content method while a message is incomplete"));
        }
        self.current = Some(InProgress {
            method,
            header: None,
            body: BytesMut::new(),
        });
        Ok(())
    }

    pub(crate) fn header(&mut self, header: ContentHeader) -> Step {
        let Some(current) = self.current.as_mut() else {
            return Err(unexpected("content header without a content method"));
        };
        if current.header.is_some() {
            self.current = None;
            return Err(unexpected("duplicate content header"));
        }
        let size = header.body_size;
        current.header = Some(header);
        if size == 0 {
            return Ok(self.complete());
        }
        if let Ok(size) = usize::try_from(size) {
            current.body.reserve(size.min(1 << 20));
        }
        Ok(None)
    }

    pub(crate) fn body(&mut self, payload: Bytes) -> Step {
        let Some(current) = self.current.as_mut() else {
            return Err(unexpected("content body without a content method"));
        };
        let Some(expected) = current.header.as_ref().map(|h| h.body_size) else {
            self.current = None;
            return Err(unexpected("content body before content header"));
        };
        let received = (current.body.len() + payload.len()) as u64;
        if received > expected {
            self.current = None;
            return Err(unexpected(format!(
                "content body of {received} bytes exceeds declared size {expected}"
            )));
        }
        current.body.extend_from_slice(&payload);
        if received == expected {
            return Ok(self.complete());
        }
        Ok(None)
    }

    fn complete(&mut self) -> Option<Content> {
        let InProgress {
            method,
            header,
            body,
        } = self.current.take()?;
        let properties = header.map(|h| h.properties).unwrap_or_default();
        let body = body.freeze();
        Some(match method {
            ContentMethod::Deliver(m) => Content::Deliver(Delivery {
                consumer_tag: m.consumer_tag,
                delivery_tag: m.delivery_tag,
                redelivered: m.redelivered,
                exchange: m.exchange,
                routing_key: m.routing_key,
                properties,
                body,
            }),
            ContentMethod::Return(m) => Content::Return(Return {
                reply_code: m.reply_code,
                reply_text: m.reply_text,
                exchange: m.exchange,
                routing_key: m.routing_key,
                properties,
                body,
            }),
            ContentMethod::GetOk(m) => Content::GetOk(GetMessage {
                delivery_tag: m.delivery_tag,
                redelivered: m.redelivered,
                exchange: m.exchange,
                routing_key: m.routing_key,
                message_count: m.message_count,
                properties,
                body,
            }),
        })
    }
}

fn unexpected(text: impl Into<String>) -> AmqpError {
    AmqpError::local(UNEXPECTED_FRAME, text)
}
