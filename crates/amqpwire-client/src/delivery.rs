//! Messages handed to and from callers.

use std::sync::OnceLock;
use std::time::Duration;

use amqpwire_frame::BasicProperties;
use bytes::Bytes;
use crossbeam_channel::{select, Receiver, RecvTimeoutError, TryRecvError};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// A message to publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Publishing {
    pub properties: BasicProperties,
    pub body: Bytes,
}

impl Publishing {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            properties: BasicProperties::default(),
            body: body.into(),
        }
    }

    pub fn with_properties(mut self, properties: BasicProperties) -> Self {
        self.properties = properties;
        self
    }
}

/// A message pushed to a consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Bytes,
}

/// A message fetched with `basic.get`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetMessage {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    /// Messages left in the queue.
    pub message_count: u32,
    pub properties: BasicProperties,
    pub body: Bytes,
}

/// An unroutable mandatory publish sent back by the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    pub reply_code: u16,
    pub reply_text: String,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Bytes,
}

/// The broker's verdict on one published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    /// Publish sequence number.
    pub delivery_tag: u64,
    pub ack: bool,
}

/// `connection.blocked` / `connection.unblocked`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocking {
    pub active: bool,
    /// Empty when unblocked.
    pub reason: String,
}

/// A registered consumer and its delivery stream.
///
/// The stream ends after `cancel`, a server-initiated cancel, or channel close.
#[derive(Debug)]
pub struct Consumer {
    pub tag: String,
    pub deliveries: Receiver<Delivery>,
}

/// The pending confirmation for one publish on a channel in confirm mode.
///
/// Resolves to `true` on ack and `false` on nack. A publish still outstanding
/// when the channel or connection closes resolves to `false`.
#[derive(Debug)]
pub struct PublishConfirm {
    delivery_tag: u64,
    rx: Receiver<bool>,
    /// Token of the channel handle that published.
    cancel: Option<CancelToken>,
    settled: OnceLock<bool>,
}

impl PublishConfirm {
    pub(crate) fn new(delivery_tag: u64, rx: Receiver<bool>, cancel: Option<CancelToken>) -> Self {
        Self {
            delivery_tag,
            rx,
            cancel,
            settled: OnceLock::new(),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    fn settle(&self, ack: bool) -> bool {
        *self.settled.get_or_init(|| ack)
    }

    /// Block until the broker confirms.
    ///
    /// Fails with [`Error::Cancelled`] if the publishing handle's token fires
    /// first; the confirmation stays pending and can be waited for again.
    pub fn wait(&self) -> Result<bool> {
        if let Some(ack) = self.settled.get() {
            return Ok(*ack);
        }
        let never = crossbeam_channel::never();
        let cancel = self.cancel.as_ref().map_or(&never, CancelToken::receiver);
        let ack = select! {
            recv(self.rx) -> ack => ack.unwrap_or(false),
            recv(cancel) -> _ => return Err(Error::Cancelled),
        };
        Ok(self.settle(ack))
    }

    /// `None` if the broker has not confirmed within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<bool> {
        if let Some(ack) = self.settled.get() {
            return Some(*ack);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(ack) => Some(self.settle(ack)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.settle(false)),
        }
    }

    /// `None` while still outstanding.
    pub fn try_result(&self) -> Option<bool> {
        if let Some(ack) = self.settled.get() {
            return Some(*ack);
        }
        match self.rx.try_recv() {
            Ok(ack) => Some(self.settle(ack)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.settle(false)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn confirm_result_is_sticky() {
        let (tx, rx) = bounded(1);
        let confirm = PublishConfirm::new(1, rx, None);
        assert_eq!(confirm.try_result(), None);
        tx.send(true).unwrap();
        drop(tx);
        assert!(confirm.wait().unwrap());
        assert!(confirm.wait().unwrap());
        assert_eq!(confirm.try_result(), Some(true));
    }

    #[test]
    fn dropped_confirm_is_negative() {
        let (tx, rx) = bounded::<bool>(1);
        let confirm = PublishConfirm::new(4, rx, None);
        assert_eq!(confirm.wait_timeout(Duration::from_millis(5)), None);
        drop(tx);
        assert_eq!(confirm.wait_timeout(Duration::from_millis(5)), Some(false));
        assert_eq!(confirm.delivery_tag(), 4);
    }

    #[test]
    fn cancelled_wait_leaves_confirm_pending() {
        let (tx, rx) = bounded(1);
        let token = CancelToken::new();
        let confirm = PublishConfirm::new(2, rx, Some(token.clone()));
        token.cancel();
        assert!(matches!(confirm.wait(), Err(Error::Cancelled)));
        assert_eq!(confirm.try_result(), None);

        tx.send(false).unwrap();
        assert_eq!(confirm.try_result(), Some(false));
        // settled values win over the fired token
        assert!(!confirm.wait().unwrap());
    }
}
