use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

/// A value set at most once, observable by blocking waiters and by `select!`.
///
/// Setting the value drops the internal sender, so every clone of
/// [`Latch::signal`] becomes disconnected at the same moment.
pub(crate) struct Latch<T> {
    value: Mutex<Option<T>>,
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl<T: Clone> Latch<T> {
    pub(crate) fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            value: Mutex::new(None),
            tx: Mutex::new(Some(tx)),
            rx,
        }
    }

    /// Store `value` if nothing was stored yet. Returns whether this call won.
    pub(crate) fn set(&self, value: T) -> bool {
        let mut slot = self.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        drop(slot);
        self.tx.lock().take();
        true
    }

    pub(crate) fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.value.lock().is_some()
    }

    /// Disconnects once the value is set.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.rx
    }

    pub(crate) fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        // only ever disconnects, never yields a message
        let _ = self.rx.recv_timeout(timeout);
        self.get()
    }

    #[cfg(test)]
    pub(crate) fn wait(&self) -> Option<T> {
        let _ = self.rx.recv();
        self.get()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn first_set_wins() {
        let latch = Latch::new();
        assert!(latch.set(1));
        assert!(!latch.set(2));
        assert_eq!(latch.get(), Some(1));
    }

    #[test]
    fn wait_timeout_expires_when_unset() {
        let latch: Latch<u8> = Latch::new();
        let started = Instant::now();
        assert_eq!(latch.wait_timeout(Duration::from_millis(20)), None);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn waiters_wake_on_set() {
        let latch = Arc::new(Latch::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        latch.set("done");
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Some("done"));
        }
    }

    #[test]
    fn signal_disconnects_on_set() {
        let latch = Latch::new();
        let signal = latch.signal().clone();
        assert!(matches!(
            signal.try_recv(),
            Err(crossbeam_channel::TryRecvError::Empty)
        ));
        latch.set(());
        assert!(matches!(
            signal.recv(),
            Err(crossbeam_channel::RecvError)
        ));
    }
}
