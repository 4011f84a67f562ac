//! Clock port definition.

use chrono::{DateTime, Utc};

/// Source of "now" for access-date bookkeeping.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Clock that only moves when told to.
    pub struct ManualClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Creates a clock reading `secs` seconds after the epoch.
        pub fn at(secs: i64) -> Self {
            Self {
                now: Mutex::new(epoch_secs(secs)),
            }
        }

        /// Moves the clock to `secs` seconds after the epoch.
        pub fn set(&self, secs: i64) {
            *self.now.lock() = epoch_secs(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    /// `secs` seconds after the epoch.
    pub fn epoch_secs(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap_or_default()
    }
}
