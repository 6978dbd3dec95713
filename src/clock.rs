//! The reference clock that decides what "today" is.
//!
//! Every applied/pending decision in the crate reads its date from one
//! [`ReferenceClock`], so two views can never disagree about which day it is.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use std::fmt;
use std::sync::RwLock;

use crate::types::{LedgerError, LedgerResult};

/// Abstracts access to the current date so services stay deterministic in tests.
pub trait ReferenceClock: Send + Sync + fmt::Debug {
    /// Current instant in UTC
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar date in the clock's canonical timezone
    fn today(&self) -> NaiveDate;
}

/// System clock read through one fixed UTC offset
#[derive(Debug, Clone, Copy)]
pub struct CanonicalClock {
    offset: FixedOffset,
}

impl CanonicalClock {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// Clock shifted `minutes` east of UTC (negative for west)
    pub fn with_offset_minutes(minutes: i32) -> LedgerResult<Self> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                LedgerError::Config(format!("UTC offset of {} minutes is out of range", minutes))
            })?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Default for CanonicalClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl ReferenceClock for CanonicalClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Clock pinned to a date; can be moved by hand.
#[derive(Debug)]
pub struct FixedClock {
    today: RwLock<NaiveDate>,
}

impl FixedClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            today: RwLock::new(today),
        }
    }

    pub fn set(&self, today: NaiveDate) {
        let mut guard = self.today.write().unwrap_or_else(|e| e.into_inner());
        *guard = today;
    }
}

impl ReferenceClock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.today()
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(Utc::now)
    }

    fn today(&self) -> NaiveDate {
        *self.today.read().unwrap_or_else(|e| e.into_inner())
    }
}
