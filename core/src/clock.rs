//! Time source abstraction.
//!
//! Anything that needs "now" takes a [`Clock`] so tests can pin time (see
//! `outreach-testing`'s `FixedClock`). The one place this matters for
//! correctness is the integration client's assume-now timestamp fill, which
//! must capture a single instant per pull.

use chrono::{DateTime, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
