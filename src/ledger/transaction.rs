//! Transaction processing and balance bookkeeping

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::ledger::recurring::RecurringRule;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::EnhancedTransactionValidator;
use crate::utils::AccountLocks;

/// Single source of truth for ledger entries.
///
/// Every write recomputes the owning account's `current_balance` and commits
/// the entry and the balance in one [`WriteBatch`], while holding the account
/// lock.
pub struct TransactionLedger<S: LedgerStorage> {
    pub(crate) storage: S,
    pub(crate) locks: Arc<AccountLocks>,
    validator: Arc<dyn TransactionValidator>,
}

impl<S: LedgerStorage + Clone> Clone for TransactionLedger<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<S: LedgerStorage> TransactionLedger<S> {
    /// Create a new transaction ledger
    pub fn new(storage: S, locks: Arc<AccountLocks>) -> Self {
        Self::with_validator(storage, locks, Arc::new(EnhancedTransactionValidator))
    }

    /// Create a new transaction ledger with custom validator
    pub fn with_validator(
        storage: S,
        locks: Arc<AccountLocks>,
        validator: Arc<dyn TransactionValidator>,
    ) -> Self {
        Self {
            storage,
            locks,
            validator,
        }
    }

    /// Record a standalone transaction and apply its balance delta
    #[tracing::instrument(skip(self, input), fields(account_id = %input.account_id, kind = %input.kind))]
    pub async fn create(&self, input: NewTransaction) -> LedgerResult<Transaction> {
        let transaction = Transaction::from_new(input, TransactionLink::Single);
        self.validator.validate_transaction(&transaction)?;

        let _guard = self.locks.acquire([transaction.account_id.clone()]).await?;
        self.insert_locked(transaction, WriteBatch::new()).await
    }

    /// Get a transaction by ID
    pub async fn get(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>> {
        self.storage.get_transaction(transaction_id).await
    }

    /// Get a transaction by ID, returning an error if not found
    pub async fn get_required(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        self.storage
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(transaction_id.to_string()))
    }

    /// List transactions matching a query
    pub async fn list(&self, query: &TransactionQuery) -> LedgerResult<Vec<Transaction>> {
        self.storage.query_transactions(query).await
    }

    /// Get transactions for a specific account
    pub async fn list_for_account(
        &self,
        account_id: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> LedgerResult<Vec<Transaction>> {
        let query = TransactionQuery::new()
            .account(account_id)
            .between(start_date, end_date);
        self.storage.query_transactions(&query).await
    }

    /// Update a transaction, reverting the old delta and applying the new one
    /// in the same commit
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(
        &self,
        transaction_id: &str,
        patch: TransactionPatch,
    ) -> LedgerResult<Transaction> {
        let existing = self.get_required(transaction_id).await?;
        let mut lock_ids = vec![existing.account_id.clone()];
        if let Some(target) = &patch.account_id {
            lock_ids.push(target.clone());
        }
        let guard = self.locks.acquire(lock_ids).await?;

        // Re-read under the lock; another writer may have got there first
        let current = self.get_required(transaction_id).await?;
        if !guard.covers(&current.account_id) {
            return Err(LedgerError::ConcurrencyConflict(format!(
                "transaction {} moved to account {} while waiting for its lock",
                transaction_id, current.account_id
            )));
        }
        if let Some(expected) = patch.expected_version {
            if expected != current.version {
                return Err(LedgerError::ConcurrencyConflict(format!(
                    "transaction {} is at version {}, update expected {}",
                    transaction_id, current.version, expected
                )));
            }
        }
        if current.is_transfer_leg() && patch.touches_money() {
            return Err(LedgerError::Validation(format!(
                "transaction {} is a transfer leg; change its amount or accounts through the transfer",
                transaction_id
            )));
        }

        let updated = patch.apply_to(&current);
        self.validator.validate_transaction(&updated)?;

        let mut batch = WriteBatch::new().put_transaction(updated.clone());
        for account in self.rebalanced_accounts(&current, &updated).await? {
            warn_if_overdrawn(&account);
            batch = batch.put_account(account);
        }
        self.storage.commit(batch).await?;

        tracing::info!(
            transaction_id = %updated.id,
            version = updated.version,
            "transaction updated"
        );
        Ok(updated)
    }

    /// Delete a transaction, reversing its effect on the account balance.
    ///
    /// Transfer legs are rejected here; use the transfer coordinator so both
    /// legs go together.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        let existing = self.get_required(transaction_id).await?;
        let mut lock_ids = vec![existing.account_id.clone()];
        if let Some((rule_id, _)) = existing.recurring_origin() {
            // The rule's applied record is edited in the same commit
            if let Some(rule) = self.storage.get_rule(rule_id).await? {
                lock_ids.push(rule.account_id);
            }
        }
        let guard = self.locks.acquire(lock_ids).await?;

        let current = self.get_required(transaction_id).await?;
        if !guard.covers(&current.account_id) {
            return Err(LedgerError::ConcurrencyConflict(format!(
                "transaction {} moved to account {} while waiting for its lock",
                transaction_id, current.account_id
            )));
        }
        if current.is_transfer_leg() {
            return Err(LedgerError::Validation(format!(
                "transaction {} is a transfer leg; delete the transfer instead",
                transaction_id
            )));
        }

        self.remove_locked(&current).await?;
        Ok(current)
    }

    /// Write a new entry and its balance change. The caller holds the account lock.
    pub(crate) async fn insert_locked(
        &self,
        transaction: Transaction,
        extra: WriteBatch,
    ) -> LedgerResult<Transaction> {
        self.write_locked(std::slice::from_ref(&transaction), &[], extra)
            .await?;
        Ok(transaction)
    }

    /// Remove an entry and reverse its balance change. The caller holds the
    /// account lock (and the rule's account lock for recurring entries).
    pub(crate) async fn remove_locked(&self, transaction: &Transaction) -> LedgerResult<()> {
        self.write_locked(&[], std::slice::from_ref(transaction), WriteBatch::new())
            .await
    }

    /// Add and remove entries together with every balance they move, in one
    /// commit. The caller holds the lock of every account involved.
    pub(crate) async fn write_locked(
        &self,
        added: &[Transaction],
        removed: &[Transaction],
        extra: WriteBatch,
    ) -> LedgerResult<()> {
        let mut accounts: BTreeMap<String, Account> = BTreeMap::new();
        let mut rules: BTreeMap<String, RecurringRule> = BTreeMap::new();
        let mut touched_rules = BTreeSet::new();
        let mut batch = WriteBatch::new();

        for transaction in added {
            self.validator.validate_transaction(transaction)?;
            self.staged_account(&mut accounts, &transaction.account_id)
                .await?
                .apply_delta(&transaction.balance_delta());
            batch = batch.put_transaction(transaction.clone());
        }

        for transaction in removed {
            self.staged_account(&mut accounts, &transaction.account_id)
                .await?
                .apply_delta(&-transaction.balance_delta());
            batch = batch.remove_transaction(transaction.id.clone());

            // Removing a materialized occurrence frees it to be applied again
            let Some((rule_id, occurrence_date)) = transaction.recurring_origin() else {
                continue;
            };
            if !rules.contains_key(rule_id) {
                let Some(rule) = self.storage.get_rule(rule_id).await? else {
                    continue;
                };
                rules.insert(rule_id.to_string(), rule);
            }
            if let Some(rule) = rules.get_mut(rule_id) {
                if rule.applied_transaction(occurrence_date) == Some(transaction.id.as_str()) {
                    rule.applied.remove(&occurrence_date);
                    rule.touch();
                    touched_rules.insert(rule_id.to_string());
                }
            }
        }

        for (rule_id, rule) in rules {
            if touched_rules.contains(&rule_id) {
                batch = batch.put_rule(rule);
            }
        }
        for account in accounts.values() {
            warn_if_overdrawn(account);
            batch = batch.put_account(account.clone());
        }
        self.storage.commit(batch.merge(extra)).await?;

        for transaction in added {
            tracing::info!(
                transaction_id = %transaction.id,
                account_id = %transaction.account_id,
                kind = %transaction.kind,
                amount = %transaction.amount,
                "transaction recorded"
            );
        }
        for transaction in removed {
            tracing::info!(
                transaction_id = %transaction.id,
                account_id = %transaction.account_id,
                "transaction deleted"
            );
        }
        for account in accounts.values() {
            tracing::debug!(account_id = %account.id, balance = %account.current_balance, "balance updated");
        }
        Ok(())
    }

    /// The copy of `account_id` being edited in this write, loaded on first use
    async fn staged_account<'a>(
        &self,
        accounts: &'a mut BTreeMap<String, Account>,
        account_id: &str,
    ) -> LedgerResult<&'a mut Account> {
        if !accounts.contains_key(account_id) {
            let account = self.account_required(account_id).await?;
            accounts.insert(account_id.to_string(), account);
        }
        accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    pub(crate) async fn account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// Accounts after reverting `old` and applying `new`
    async fn rebalanced_accounts(
        &self,
        old: &Transaction,
        new: &Transaction,
    ) -> LedgerResult<Vec<Account>> {
        let mut source = self.account_required(&old.account_id).await?;
        source.apply_delta(&-old.balance_delta());

        if new.account_id == old.account_id {
            source.apply_delta(&new.balance_delta());
            return Ok(vec![source]);
        }

        let mut target = self.account_required(&new.account_id).await?;
        target.apply_delta(&new.balance_delta());
        Ok(vec![source, target])
    }
}

fn warn_if_overdrawn(account: &Account) {
    if account.is_overdrawn() {
        tracing::warn!(
            account_id = %account.id,
            balance = %account.current_balance,
            "account balance is negative"
        );
    }
}

/// Sum of balance deltas of `transactions`
pub fn net_balance_delta<'a, I>(transactions: I) -> BigDecimal
where
    I: IntoIterator<Item = &'a Transaction>,
{
    transactions
        .into_iter()
        .map(|t| t.balance_delta())
        .sum()
}
