//! The two execution clocks.
//!
//! Both deadlines are plain values computed from [`Instant`]s passed in by
//! the caller, so either one can be exercised without a real clock.

use std::time::Duration;

use tokio::time::Instant;

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expired {
    /// The absolute per-execution limit.
    Session,
    /// No output for the sliding per-read window.
    Idle,
}

/// Absolute session deadline plus a sliding idle deadline.
#[derive(Debug, Clone, Copy)]
pub struct Deadlines {
    started: Instant,
    last_activity: Instant,
    session_timeout: Duration,
    message_timeout: Duration,
}

impl Deadlines {
    /// Start both clocks at `now`.
    #[must_use]
    pub fn start(now: Instant, session_timeout: Duration, message_timeout: Duration) -> Self {
        Self {
            started: now,
            last_activity: now,
            session_timeout,
            message_timeout,
        }
    }

    /// Reset the idle clock after a line was received.
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// The first deadline that has elapsed at `now`, session first.
    #[must_use]
    pub fn expired(&self, now: Instant) -> Option<Expired> {
        if now.saturating_duration_since(self.started) >= self.session_timeout {
            Some(Expired::Session)
        } else if now.saturating_duration_since(self.last_activity) >= self.message_timeout {
            Some(Expired::Idle)
        } else {
            None
        }
    }

    /// Time until the nearer deadline, zero if one already elapsed.
    ///
    /// A limit too large to represent as an [`Instant`] never fires and
    /// counts as [`Duration::MAX`].
    #[must_use]
    pub fn remaining(&self, now: Instant) -> Duration {
        let session = until(self.started, self.session_timeout, now);
        let idle = until(self.last_activity, self.message_timeout, now);
        session.min(idle)
    }

    /// Time since the clocks started.
    #[must_use]
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Configured session limit.
    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        self.session_timeout
    }

    /// Configured idle limit.
    #[must_use]
    pub fn message_timeout(&self) -> Duration {
        self.message_timeout
    }
}

fn until(from: Instant, limit: Duration, now: Instant) -> Duration {
    from.checked_add(limit)
        .map_or(Duration::MAX, |deadline| deadline.saturating_duration_since(now))
}
