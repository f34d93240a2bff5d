//! Wall-clock access, injected rather than read from the OS directly.
//!
//! Freshness checks (§4.5) need "now" as an input so tests can supply
//! fixed instants instead of racing the real clock, the same reasoning
//! the teacher applies by constructing its `BcContext` with explicit,
//! caller-supplied collaborators rather than reaching for globals.

use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current time, expressed as milliseconds since the
/// Unix epoch (matching the resolution the master token/user-ID token
/// expiration and renewal fields are defined in).
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// A [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A [`Clock`] that always reports a fixed instant, for tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
