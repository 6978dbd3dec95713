//! Applied / pending classification against the canonical clock

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::clock::ReferenceClock;
use crate::types::Transaction;

/// Whether `transaction` counts as applied today.
///
/// An explicit flag wins; otherwise the entry is applied once its date is no
/// later than the clock's today.
pub fn is_applied(transaction: &Transaction, clock: &dyn ReferenceClock) -> bool {
    is_applied_on(transaction, clock.today())
}

/// [`is_applied`] against a fixed date
pub fn is_applied_on(transaction: &Transaction, today: NaiveDate) -> bool {
    transaction.applied.unwrap_or(transaction.date <= today)
}

/// Read-side status of a calendar entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Recorded and in effect
    Applied,
    /// Recorded but not yet in effect
    Pending,
    /// Not recorded yet; a recurring occurrence
    Scheduled,
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryStatus::Applied => f.write_str("applied"),
            EntryStatus::Pending => f.write_str("pending"),
            EntryStatus::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Every applied/pending decision goes through one of these, so all views
/// share the same notion of today.
#[derive(Debug, Clone)]
pub struct PendingStateClassifier {
    clock: Arc<dyn ReferenceClock>,
}

impl PendingStateClassifier {
    pub fn new(clock: Arc<dyn ReferenceClock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn ReferenceClock> {
        &self.clock
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn is_applied(&self, transaction: &Transaction) -> bool {
        is_applied(transaction, self.clock.as_ref())
    }

    pub fn status(&self, transaction: &Transaction) -> EntryStatus {
        if self.is_applied(transaction) {
            EntryStatus::Applied
        } else {
            EntryStatus::Pending
        }
    }

    /// Split entries into (applied, pending), reading today once
    pub fn split<'a, I>(&self, transactions: I) -> (Vec<&'a Transaction>, Vec<&'a Transaction>)
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let today = self.today();
        transactions
            .into_iter()
            .partition(|transaction| is_applied_on(transaction, today))
    }
}
