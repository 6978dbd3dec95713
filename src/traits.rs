//! Traits for storage abstraction and extensibility

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;

use crate::ledger::recurring::RecurringRule;
use crate::types::*;

/// A set of writes that must become visible together.
///
/// Every ledger mutation is expressed as one batch so a reader never sees a
/// transaction without its balance change (or the reverse).
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub accounts: Vec<Account>,
    pub removed_accounts: Vec<String>,
    pub transactions: Vec<Transaction>,
    pub removed_transactions: Vec<String>,
    pub rules: Vec<RecurringRule>,
    pub removed_rules: Vec<String>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_account(mut self, account: Account) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn remove_account(mut self, account_id: impl Into<String>) -> Self {
        self.removed_accounts.push(account_id.into());
        self
    }

    pub fn put_transaction(mut self, transaction: Transaction) -> Self {
        self.transactions.push(transaction);
        self
    }

    pub fn remove_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.removed_transactions.push(transaction_id.into());
        self
    }

    pub fn put_rule(mut self, rule: RecurringRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn remove_rule(mut self, rule_id: impl Into<String>) -> Self {
        self.removed_rules.push(rule_id.into());
        self
    }

    /// Append every write of `other`
    pub fn merge(mut self, other: WriteBatch) -> Self {
        self.accounts.extend(other.accounts);
        self.removed_accounts.extend(other.removed_accounts);
        self.transactions.extend(other.transactions);
        self.removed_transactions.extend(other.removed_transactions);
        self.rules.extend(other.rules);
        self.removed_rules.extend(other.removed_rules);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.removed_accounts.is_empty()
            && self.transactions.is_empty()
            && self.removed_transactions.is_empty()
            && self.rules.is_empty()
            && self.removed_rules.is_empty()
    }
}

/// Filter for transaction lookups. Every set field must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionQuery {
    pub account_id: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub transfer_token: Option<String>,
    pub rule_id: Option<String>,
}

impl TransactionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn between(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn transfer_token(mut self, token: impl Into<String>) -> Self {
        self.transfer_token = Some(token.into());
        self
    }

    pub fn rule(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }

    /// Whether `transaction` passes this filter
    pub fn matches(&self, transaction: &Transaction) -> bool {
        if let Some(account_id) = &self.account_id {
            if &transaction.account_id != account_id {
                return false;
            }
        }
        if let Some(start) = self.start_date {
            if transaction.date < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if transaction.date > end {
                return false;
            }
        }
        if let Some(token) = &self.transfer_token {
            if transaction.transfer_token() != Some(token.as_str()) {
                return false;
            }
        }
        if let Some(rule_id) = &self.rule_id {
            if transaction.recurring_origin().map(|(id, _)| id) != Some(rule_id.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Storage abstraction for the ledger system
///
/// This trait allows the ledger to work with any storage backend
/// (PostgreSQL, SQLite, in-memory, etc.) by implementing these methods.
/// `commit` must apply a batch atomically: either every write is visible
/// afterwards or none is.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    /// Get an account by ID
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>>;

    /// List all accounts, optionally filtered by type
    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>>;

    /// Get a transaction by ID
    async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>>;

    /// List transactions matching a query, ordered by date then creation time
    async fn query_transactions(&self, query: &TransactionQuery) -> LedgerResult<Vec<Transaction>>;

    /// Get a recurring rule by ID
    async fn get_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>>;

    /// List recurring rules, optionally for one account
    async fn list_rules(&self, account_id: Option<&str>) -> LedgerResult<Vec<RecurringRule>>;

    /// Atomically apply a batch of writes
    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()>;

    /// Whether one `commit` may span several accounts.
    ///
    /// Backends that can only persist one account's aggregate at a time return
    /// `false`; transfers then write one leg per commit and report a
    /// [`LedgerError::PartialFailure`] when the second commit fails.
    fn multi_account_commits(&self) -> bool {
        true
    }
}

/// Trait for implementing custom account validation rules
pub trait AccountValidator: Send + Sync {
    /// Validate an account before saving
    fn validate_account(&self, account: &Account) -> LedgerResult<()>;
}

/// Trait for implementing custom transaction validation rules
pub trait TransactionValidator: Send + Sync {
    /// Validate a transaction before it is written
    fn validate_transaction(&self, transaction: &Transaction) -> LedgerResult<()>;
}

/// Default account validator with basic rules
pub struct DefaultAccountValidator;

impl AccountValidator for DefaultAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        if account.id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account ID cannot be empty".to_string(),
            ));
        }

        if account.name.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Account name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Default transaction validator: positive amount, account and description present
pub struct DefaultTransactionValidator;

impl TransactionValidator for DefaultTransactionValidator {
    fn validate_transaction(&self, transaction: &Transaction) -> LedgerResult<()> {
        if transaction.amount <= BigDecimal::from(0) {
            return Err(LedgerError::Validation(format!(
                "Amount must be positive, got {}",
                transaction.amount
            )));
        }

        if transaction.account_id.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Transaction must reference an account".to_string(),
            ));
        }

        if transaction.description.trim().is_empty() {
            return Err(LedgerError::Validation(
                "Transaction description cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}
