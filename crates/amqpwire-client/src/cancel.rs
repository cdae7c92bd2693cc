use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

/// A shareable cancellation signal for blocking channel calls.
///
/// Cancelling makes a waiting call return [`Error::Cancelled`](crate::Error::Cancelled)
/// promptly. A request that was already sent is not retracted: its reply is
/// still consumed by the channel and discarded.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<Mutex<Option<Sender<()>>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
            rx,
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        self.tx.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Disconnects once the token fires; for use in `select!`.
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
