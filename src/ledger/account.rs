//! Account management functionality

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ledger::transaction::net_balance_delta;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::EnhancedAccountValidator;
use crate::utils::AccountLocks;

/// Recorded balance of one account next to the balance its entries imply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceCheck {
    pub account_id: String,
    pub initial_balance: BigDecimal,
    pub recorded_balance: BigDecimal,
    pub computed_balance: BigDecimal,
}

impl BalanceCheck {
    pub fn is_consistent(&self) -> bool {
        self.recorded_balance == self.computed_balance
    }

    /// Recorded minus computed
    pub fn drift(&self) -> BigDecimal {
        &self.recorded_balance - &self.computed_balance
    }
}

/// Owns account records and their stored balances
pub struct AccountStore<S: LedgerStorage> {
    pub(crate) storage: S,
    locks: Arc<AccountLocks>,
    validator: Arc<dyn AccountValidator>,
}

impl<S: LedgerStorage + Clone> Clone for AccountStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            locks: self.locks.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<S: LedgerStorage> AccountStore<S> {
    /// Create a new account store
    pub fn new(storage: S, locks: Arc<AccountLocks>) -> Self {
        Self::with_validator(storage, locks, Arc::new(EnhancedAccountValidator))
    }

    /// Create a new account store with custom validator
    pub fn with_validator(
        storage: S,
        locks: Arc<AccountLocks>,
        validator: Arc<dyn AccountValidator>,
    ) -> Self {
        Self {
            storage,
            locks,
            validator,
        }
    }

    /// Create a new account
    #[tracing::instrument(skip(self, name, initial_balance))]
    pub async fn create_account(
        &self,
        id: String,
        name: String,
        account_type: AccountType,
        initial_balance: BigDecimal,
    ) -> LedgerResult<Account> {
        let account = Account::new(id, name, account_type, initial_balance);
        self.validator.validate_account(&account)?;

        let _guard = self.locks.acquire([account.id.clone()]).await?;
        if self.storage.get_account(&account.id).await?.is_some() {
            return Err(LedgerError::Validation(format!(
                "Account with ID '{}' already exists",
                account.id
            )));
        }

        self.storage
            .commit(WriteBatch::new().put_account(account.clone()))
            .await?;
        tracing::info!(account_id = %account.id, balance = %account.current_balance, "account created");
        Ok(account)
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.storage.get_account(account_id).await
    }

    /// Get an account by ID, returning an error if not found
    pub async fn get_account_required(&self, account_id: &str) -> LedgerResult<Account> {
        self.storage
            .get_account(account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))
    }

    /// List all accounts
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(None).await
    }

    /// List accounts by type
    pub async fn list_accounts_by_type(
        &self,
        account_type: AccountType,
    ) -> LedgerResult<Vec<Account>> {
        self.storage.list_accounts(Some(account_type)).await
    }

    pub async fn rename_account(&self, account_id: &str, name: String) -> LedgerResult<Account> {
        let _guard = self.locks.acquire([account_id]).await?;
        let mut account = self.get_account_required(account_id).await?;
        account.name = name;
        account.updated_at = chrono::Utc::now().naive_utc();
        self.validator.validate_account(&account)?;

        self.storage
            .commit(WriteBatch::new().put_account(account.clone()))
            .await?;
        tracing::info!(account_id, "account renamed");
        Ok(account)
    }

    /// Change the opening balance; the current balance moves by the same amount
    #[tracing::instrument(skip(self))]
    pub async fn set_initial_balance(
        &self,
        account_id: &str,
        initial_balance: BigDecimal,
    ) -> LedgerResult<Account> {
        let _guard = self.locks.acquire([account_id]).await?;
        let mut account = self.get_account_required(account_id).await?;
        let shift = &initial_balance - &account.initial_balance;
        account.initial_balance = initial_balance;
        account.apply_delta(&shift);

        self.storage
            .commit(WriteBatch::new().put_account(account.clone()))
            .await?;
        tracing::info!(
            account_id,
            %shift,
            balance = %account.current_balance,
            "initial balance changed"
        );
        Ok(account)
    }

    /// Delete an account that nothing references any more
    #[tracing::instrument(skip(self))]
    pub async fn delete_account(&self, account_id: &str) -> LedgerResult<Account> {
        let _guard = self.locks.acquire([account_id]).await?;
        let account = self.get_account_required(account_id).await?;

        let entries = self
            .storage
            .query_transactions(&TransactionQuery::new().account(account_id))
            .await?;
        if !entries.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Account '{}' still has {} transactions",
                account_id,
                entries.len()
            )));
        }
        let rules = self.storage.list_rules(Some(account_id)).await?;
        if !rules.is_empty() {
            return Err(LedgerError::Validation(format!(
                "Account '{}' still has {} recurring rules",
                account_id,
                rules.len()
            )));
        }

        self.storage
            .commit(WriteBatch::new().remove_account(account_id))
            .await?;
        tracing::info!(account_id, "account deleted");
        Ok(account)
    }

    /// Recompute the balance from the ledger and compare with the stored one
    pub async fn verify_balance(&self, account_id: &str) -> LedgerResult<BalanceCheck> {
        let _guard = self.locks.acquire([account_id]).await?;
        let account = self.get_account_required(account_id).await?;
        let entries = self
            .storage
            .query_transactions(&TransactionQuery::new().account(account_id))
            .await?;

        let computed_balance = &account.initial_balance + net_balance_delta(&entries);
        let check = BalanceCheck {
            account_id: account.id,
            initial_balance: account.initial_balance,
            recorded_balance: account.current_balance,
            computed_balance,
        };
        if !check.is_consistent() {
            tracing::warn!(account_id, drift = %check.drift(), "stored balance drifted from ledger");
        }
        Ok(check)
    }
}
