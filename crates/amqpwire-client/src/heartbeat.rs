//! Heartbeat monitor: keeps an idle connection alive and detects a silent peer.

use std::time::{Duration, Instant};

use amqpwire_frame::Frame;
use crossbeam_channel::{select, tick};
use tracing::{trace, warn};

use crate::connection::Inner;
use crate::error::Error;

const MIN_TICK: Duration = Duration::from_millis(50);

/// Outbound heartbeats go out once nothing else was written for a full
/// `interval`; the connection fails after `2 * interval` without any inbound
/// frame. Returns when the connection reaches its terminal state.
pub(crate) fn run(inner: &Inner, interval: Duration) {
    let ticker = tick((interval / 4).max(MIN_TICK));
    loop {
        select! {
            recv(ticker) -> _ => {}
            recv(inner.terminal.signal()) -> _ => return,
        }

        let now = Instant::now();
        let idle_in = now.saturating_duration_since(*inner.last_recv.lock());
        if idle_in >= interval * 2 {
            warn!(idle = ?idle_in, interval = ?interval, "no traffic from server, closing connection");
            inner.teardown(Error::MissedHeartbeats);
            return;
        }

        let idle_out = now.saturating_duration_since(*inner.last_sent.lock());
        if due(idle_out, interval) {
            trace!("sending heartbeat");
            if inner.send_control(&[Frame::Heartbeat]).is_err() {
                return;
            }
        }
    }
}

fn due(idle: Duration, interval: Duration) -> bool {
    idle >= interval
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_due_after_full_interval() {
        let interval = Duration::from_secs(10);
        assert!(!due(Duration::from_secs(9), interval));
        assert!(due(Duration::from_secs(10), interval));
        assert!(due(Duration::from_secs(25), interval));
    }
}
