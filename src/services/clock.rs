//! Clock and timezone source.
//!
//! All day-boundary decisions (dedup day, default invoice date, scheduler window)
//! go through [`Clock`] so they can be pinned in tests.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Source of the current instant
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Converts an instant to wall-clock time in `tz`.
    fn local(&self, at: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
        at.with_timezone(&tz)
    }

    /// Today's calendar date in `tz`.
    fn today(&self, tz: Tz) -> NaiveDate {
        self.local(self.now(), tz).date_naive()
    }
}

/// Wall clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
