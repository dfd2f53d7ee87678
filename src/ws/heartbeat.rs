//! C9 — heartbeat timers. A cyclic ping timer keeps idle connections from
//! being reaped by intermediaries; a one-shot pong-timeout timer detects a
//! peer that stopped responding.

use std::time::{Duration, Instant};

/// Ping period: 85% of the configured keep-alive interval, capped at 5s.
fn ping_period(keep_alive: Duration) -> Duration {
    let scaled = keep_alive.mul_f64(0.85);
    scaled.min(Duration::from_secs(5))
}

/// Pong timeout: 2x keep-alive, floored at 16s.
fn pong_timeout(keep_alive: Duration) -> Duration {
    (keep_alive * 2).max(Duration::from_secs(16))
}

/// Tracks when the next ping is due and when the connection should be
/// declared dead for lack of a pong (or any other received frame).
pub struct Heartbeat {
    ping_period: Duration,
    pong_timeout: Duration,
    next_ping_at: Instant,
    pong_deadline: Instant,
}

impl Heartbeat {
    pub fn new(keep_alive: Duration) -> Self {
        let now = Instant::now();
        let ping_period = ping_period(keep_alive);
        let pong_timeout = pong_timeout(keep_alive);
        Self {
            ping_period,
            pong_timeout,
            next_ping_at: now + ping_period,
            pong_deadline: now + pong_timeout,
        }
    }

    /// Any frame received — ping, pong, data, or close — resets the
    /// pong-timeout deadline; the peer is demonstrably alive.
    pub fn on_frame_received(&mut self) {
        self.pong_deadline = Instant::now() + self.pong_timeout;
    }

    /// True once `next_ping_at` has elapsed; the caller should send a ping
    /// and call `ping_sent`.
    pub fn ping_due(&self) -> bool {
        Instant::now() >= self.next_ping_at
    }

    pub fn ping_sent(&mut self) {
        self.next_ping_at = Instant::now() + self.ping_period;
    }

    /// True once the connection has gone silent for `pong_timeout` — the
    /// caller should treat this as a dead link and reconnect.
    pub fn pong_expired(&self) -> bool {
        Instant::now() >= self.pong_deadline
    }

    /// How long until the next timer event (ping or pong-timeout),
    /// whichever comes first — used as the worker's recv-timeout so the
    /// blocking read wakes in time to act on either.
    pub fn next_wakeup(&self) -> Duration {
        let now = Instant::now();
        let until_ping = self.next_ping_at.saturating_duration_since(now);
        let until_timeout = self.pong_deadline.saturating_duration_since(now);
        until_ping.min(until_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_caps_at_five_seconds() {
        assert_eq!(ping_period(Duration::from_secs(20)), Duration::from_millis(5_000));
        assert_eq!(ping_period(Duration::from_secs(1)), Duration::from_millis(850));
    }

    #[test]
    fn pong_timeout_floors_at_sixteen_seconds() {
        assert_eq!(pong_timeout(Duration::from_secs(1)), Duration::from_secs(16));
        assert_eq!(pong_timeout(Duration::from_secs(20)), Duration::from_secs(40));
    }

    #[test]
    fn fresh_heartbeat_has_neither_fired() {
        let hb = Heartbeat::new(Duration::from_secs(20));
        assert!(!hb.ping_due());
        assert!(!hb.pong_expired());
    }

    #[test]
    fn received_frame_pushes_pong_deadline_forward() {
        let mut hb = Heartbeat::new(Duration::from_millis(50));
        let before = hb.pong_deadline;
        std::thread::sleep(Duration::from_millis(5));
        hb.on_frame_received();
        assert!(hb.pong_deadline > before);
    }
}
