use std::collections::BTreeMap;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::warn;

use crate::delivery::Confirmation;

/// Publish sequence numbers and their outstanding confirmations.
///
/// Sequence numbers start at 1 once confirm mode is on. Confirmations are
/// emitted to listeners in sequence order even when the broker resolves
/// single tags out of order.
pub(crate) struct Confirms {
    enabled: bool,
    next: u64,
    outstanding: BTreeMap<u64, Sender<bool>>,
    /// Resolved but not yet emitted because a lower tag is still outstanding.
    resolved: BTreeMap<u64, bool>,
    listeners: Vec<Sender<Confirmation>>,
}

impl Confirms {
    pub(crate) fn new() -> Self {
        Self {
            enabled: false,
            next: 1,
            outstanding: BTreeMap::new(),
            resolved: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    pub(crate) fn enable(&mut self) {
        self.enabled = true;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The tag the next publish will get.
    pub(crate) fn next_seq_no(&self) -> u64 {
        self.next
    }

    pub(crate) fn listen(&mut self, listener: Sender<Confirmation>) {
        self.listeners.push(listener);
    }

    /// Assign the next sequence number. Must be called under the writer lock.
    pub(crate) fn publish(&mut self) -> (u64, Receiver<bool>) {
        let tag = self.next;
        self.next += 1;
        let (tx, rx) = bounded(1);
        self.outstanding.insert(tag, tx);
        (tag, rx)
    }

    /// Undo the last [`publish`](Self::publish) when its frames were never written.
    pub(crate) fn unpublish(&mut self, tag: u64) {
        if tag + 1 == self.next && self.outstanding.remove(&tag).is_some() {
            self.next = tag;
        }
    }

    /// Apply a `basic.ack` or `basic.nack`.
    pub(crate) fn resolve(&mut self, tag: u64, multiple: bool, ack: bool) {
        if multiple {
            let rest = match tag.checked_add(1) {
                Some(above) => self.outstanding.split_off(&above),
                None => BTreeMap::new(),
            };
            let done = std::mem::replace(&mut self.outstanding, rest);
            for (tag, waiter) in done {
                self.settle(tag, waiter, ack);
            }
        } else if let Some(waiter) = self.outstanding.remove(&tag) {
            self.settle(tag, waiter, ack);
        } else {
            warn!(delivery_tag = tag, "confirm for unknown publish sequence number");
        }
        self.emit();
    }

    /// Resolve everything still outstanding as negative and close the listeners.
    pub(crate) fn fail_all(&mut self) {
        for (tag, waiter) in std::mem::take(&mut self.outstanding) {
            self.settle(tag, waiter, false);
        }
        self.emit();
        self.listeners.clear();
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    fn settle(&mut self, tag: u64, waiter: Sender<bool>, ack: bool) {
        let _ = waiter.send(ack);
        self.resolved.insert(tag, ack);
    }

    fn emit(&mut self) {
        loop {
            // tags rolled back by `unpublish` or acked twice leave gaps
            let lowest_open = self.outstanding.keys().next().copied().unwrap_or(u64::MAX);
            let Some((&tag, &ack)) = self.resolved.iter().next() else {
                break;
            };
            if tag > lowest_open {
                break;
            }
            self.resolved.remove(&tag);
            let confirmation = Confirmation {
                delivery_tag: tag,
                ack,
            };
            self.listeners
                .retain(|listener| listener.send(confirmation).is_ok());
        }
    }
}
