use chrono::{DateTime, Utc};

/// Source of "now" for timeout/throttle logic (delay-delete throttling,
/// lifecycle-heartbeat threshold). Exists so those can be tested without
/// real sleeps, the same role `original_source/context/context.go`'s
/// `clock.Clock` field plays.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
