//! Liveness bookkeeping for the client-to-server heartbeat stream.
//!
//! A single dedicated unidirectional-looking exchange (opened as a bidi
//! stream like everything else, so it takes the same framing path) is kept
//! open for the lifetime of a [`QuicLink`](../../proxy_client/struct.QuicLink.html)
//! connection. The client writes [`crate::framing::HEARTBEAT_LINE`] on an
//! interval and expects [`crate::framing::HEARTBEAT_RESPONSE_LINE`] back
//! within a timeout; missing one marks the connection dead so the caller can
//! reconnect.

use std::time::{Duration, Instant};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Tracks when a heartbeat was last sent and when a response was last seen.
#[derive(Debug, Clone)]
pub struct HeartbeatState {
    interval: Duration,
    timeout: Duration,
    last_sent: Option<Instant>,
    last_recv: Option<Instant>,
}

impl HeartbeatState {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_sent: None,
            last_recv: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Records that a heartbeat probe was just sent.
    pub fn record_sent(&mut self, at: Instant) {
        self.last_sent = Some(at);
    }

    /// Records that a heartbeat response was just observed. This is the fix
    /// for the original bug where `last_recv` was never advanced: without
    /// it every round after the first looks timed out even though the peer
    /// is answering every probe.
    pub fn record_received(&mut self, at: Instant) {
        self.last_recv = Some(at);
    }

    /// Whether more than `timeout` has elapsed since the last confirmed
    /// response, measured from `now`. Before any heartbeat has ever been
    /// sent, the link is assumed alive.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.last_sent {
            None => false,
            Some(sent) => {
                let baseline = self.last_recv.unwrap_or(sent);
                now.saturating_duration_since(baseline) > self.timeout
            }
        }
    }
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, DEFAULT_TIMEOUT)
    }
}
