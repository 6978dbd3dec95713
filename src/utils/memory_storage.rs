//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ledger::recurring::RecurringRule;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<String, Account>,
    transactions: HashMap<String, Transaction>,
    rules: HashMap<String, RecurringRule>,
}

/// In-memory storage implementation for testing and development.
///
/// Clones share the same underlying state. A batch is applied under a single
/// write lock, so concurrent readers see it entirely or not at all.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    state: Arc<RwLock<State>>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> LedgerResult<()> {
        let mut state = self.write()?;
        state.accounts.clear();
        state.transactions.clear();
        state.rules.clear();
        Ok(())
    }

    fn read(&self) -> LedgerResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }

    fn write(&self) -> LedgerResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| LedgerError::Storage("memory storage lock poisoned".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryStorage {
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.read()?.accounts.get(account_id).cloned())
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        let state = self.read()?;
        let mut filtered: Vec<Account> = state
            .accounts
            .values()
            .filter(|account| account_type.is_none_or(|t| account.account_type == t))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(filtered)
    }

    async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>> {
        Ok(self.read()?.transactions.get(transaction_id).cloned())
    }

    async fn query_transactions(&self, query: &TransactionQuery) -> LedgerResult<Vec<Transaction>> {
        let state = self.read()?;
        let mut filtered: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|txn| query.matches(txn))
            .cloned()
            .collect();
        filtered.sort_by(|a, b| {
            (a.date, a.created_at, &a.id).cmp(&(b.date, b.created_at, &b.id))
        });
        Ok(filtered)
    }

    async fn get_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>> {
        Ok(self.read()?.rules.get(rule_id).cloned())
    }

    async fn list_rules(&self, account_id: Option<&str>) -> LedgerResult<Vec<RecurringRule>> {
        let state = self.read()?;
        let mut rules: Vec<RecurringRule> = state
            .rules
            .values()
            .filter(|rule| account_id.is_none_or(|id| rule.account_id == id))
            .cloned()
            .collect();
        rules.sort_by(|a, b| (a.start_date, &a.id).cmp(&(b.start_date, &b.id)));
        Ok(rules)
    }

    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()> {
        let mut state = self.write()?;

        // Check removals before touching anything so a bad batch changes nothing
        for id in &batch.removed_accounts {
            if !state.accounts.contains_key(id) {
                return Err(LedgerError::AccountNotFound(id.clone()));
            }
        }
        for id in &batch.removed_transactions {
            if !state.transactions.contains_key(id) {
                return Err(LedgerError::TransactionNotFound(id.clone()));
            }
        }
        for id in &batch.removed_rules {
            if !state.rules.contains_key(id) {
                return Err(LedgerError::RuleNotFound(id.clone()));
            }
        }

        for id in &batch.removed_transactions {
            state.transactions.remove(id);
        }
        for id in &batch.removed_rules {
            state.rules.remove(id);
        }
        for id in &batch.removed_accounts {
            state.accounts.remove(id);
        }
        for account in batch.accounts {
            state.accounts.insert(account.id.clone(), account);
        }
        for transaction in batch.transactions {
            state.transactions.insert(transaction.id.clone(), transaction);
        }
        for rule in batch.rules {
            state.rules.insert(rule.id.clone(), rule);
        }

        Ok(())
    }
}
