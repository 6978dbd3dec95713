//! Per-account mutual exclusion

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::types::{LedgerError, LedgerResult};

/// Registry of one async mutex per account id.
///
/// Every read-modify-write of an account balance runs while holding that
/// account's lock. Multi-account operations go through [`AccountLocks::acquire`],
/// which always locks in ascending id order so two transfers between the same
/// pair of accounts in opposite directions cannot deadlock.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Held locks; released on drop
#[derive(Debug)]
pub struct AccountGuard {
    account_ids: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountGuard {
    /// Locked account ids in acquisition order
    pub fn account_ids(&self) -> &[String] {
        &self.account_ids
    }

    pub fn covers(&self, account_id: &str) -> bool {
        self.account_ids.iter().any(|id| id == account_id)
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every listed account, in ascending id order, duplicates ignored
    pub async fn acquire<I, T>(&self, account_ids: I) -> LedgerResult<AccountGuard>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut ids: Vec<String> = account_ids.into_iter().map(Into::into).collect();
        ids.sort();
        ids.dedup();

        // The registry mutex is released before awaiting any account lock
        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| LedgerError::Storage("account lock registry poisoned".to_string()))?;
            // Entries nobody holds or waits on are only referenced by the map
            slots.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            ids.iter()
                .map(|id| slots.entry(id.clone()).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(mutexes.len());
        for mutex in mutexes {
            guards.push(mutex.lock_owned().await);
        }
        tracing::debug!(accounts = ?ids, "acquired account locks");

        Ok(AccountGuard {
            account_ids: ids,
            _guards: guards,
        })
    }

    /// Number of account ids with a live lock entry
    pub fn tracked(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or_default()
    }
}
