//! Core types and data structures for the ledger

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kinds of accounts a person tracks money in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Physical cash or a wallet
    Cash,
    /// Checking or current bank account
    Bank,
    /// Credit card; balances are usually negative
    CreditCard,
    /// Dedicated savings account
    Savings,
    /// Brokerage or investment account
    Investment,
    /// Anything else
    Other,
}

/// Core account structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier for the account
    pub id: String,
    /// Human-readable account name
    pub name: String,
    /// Type of account (Cash, Bank, etc.)
    pub account_type: AccountType,
    /// Balance the account was opened with
    pub initial_balance: BigDecimal,
    /// Initial balance plus the signed amount of every posted transaction
    pub current_balance: BigDecimal,
    /// When the account was created
    pub created_at: NaiveDateTime,
    /// When the account was last updated
    pub updated_at: NaiveDateTime,
}

impl Account {
    /// Create a new account whose current balance starts at its initial balance
    pub fn new(
        id: String,
        name: String,
        account_type: AccountType,
        initial_balance: BigDecimal,
    ) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id,
            name,
            account_type,
            current_balance: initial_balance.clone(),
            initial_balance,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shift the current balance by a signed delta
    pub fn apply_delta(&mut self, delta: &BigDecimal) {
        self.current_balance += delta;
        self.updated_at = chrono::Utc::now().naive_utc();
    }

    /// Whether the current balance is below zero
    pub fn is_overdrawn(&self) -> bool {
        self.current_balance < BigDecimal::from(0)
    }
}

/// Direction of a ledger entry.
///
/// Wire names follow the stored records (`ingreso`, `egreso`, `ahorro`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Money coming into the account
    #[serde(rename = "ingreso")]
    Income,
    /// Money leaving the account
    #[serde(rename = "egreso")]
    Expense,
    /// Money set aside as savings. It leaves the source account and is
    /// reported separately as a positive saved total.
    #[serde(rename = "ahorro")]
    Saving,
}

impl TransactionKind {
    /// Signed balance effect of `amount` for this kind
    pub fn signed(&self, amount: &BigDecimal) -> BigDecimal {
        match self {
            TransactionKind::Income => amount.clone(),
            TransactionKind::Expense | TransactionKind::Saving => -amount.clone(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "ingreso",
            TransactionKind::Expense => "egreso",
            TransactionKind::Saving => "ahorro",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of a transaction inside a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegRole {
    /// The leg that takes money out of the origin account
    Debit,
    /// The leg that puts money into the destination account
    Credit,
}

impl LegRole {
    pub fn opposite(&self) -> LegRole {
        match self {
            LegRole::Debit => LegRole::Credit,
            LegRole::Credit => LegRole::Debit,
        }
    }
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegRole::Debit => f.write_str("debit"),
            LegRole::Credit => f.write_str("credit"),
        }
    }
}

/// How a transaction relates to other ledger records
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "link", rename_all = "snake_case")]
pub enum TransactionLink {
    /// A standalone entry
    #[default]
    Single,
    /// One half of a transfer
    TransferLeg {
        /// Correlation token shared by both legs
        token: String,
        role: LegRole,
        /// Account holding the other leg
        counterparty_account_id: String,
    },
    /// Materialized occurrence of a recurring rule
    Recurring {
        rule_id: String,
        /// Cadence date of the occurrence (before any postponement)
        occurrence_date: NaiveDate,
    },
}

/// A single monetary entry against one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,
    /// Account the entry is booked against
    pub account_id: String,
    pub kind: TransactionKind,
    /// Always positive; the sign comes from `kind`
    pub amount: BigDecimal,
    /// Date of the transaction
    pub date: NaiveDate,
    pub description: String,
    pub category_id: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    /// Explicit applied flag. `None` means the status is derived from the date.
    pub applied: Option<bool>,
    #[serde(flatten)]
    pub link: TransactionLink,
    /// Incremented on every update
    pub version: u64,
    /// When the transaction was created
    pub created_at: NaiveDateTime,
    /// When the transaction was last updated
    pub updated_at: NaiveDateTime,
}

impl Transaction {
    /// Build a transaction with a fresh id from creation input
    pub fn from_new(input: NewTransaction, link: TransactionLink) -> Self {
        let now = chrono::Utc::now().naive_utc();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id: input.account_id,
            kind: input.kind,
            amount: input.amount,
            date: input.date,
            description: input.description,
            category_id: input.category_id,
            icon: input.icon,
            color: input.color,
            applied: input.applied,
            link,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Signed amount regardless of whether the entry is posted
    pub fn signed_amount(&self) -> BigDecimal {
        self.kind.signed(&self.amount)
    }

    /// Whether the entry counts toward the stored account balance.
    ///
    /// Only entries explicitly held with `applied = false` are excluded.
    pub fn affects_balance(&self) -> bool {
        self.applied != Some(false)
    }

    /// Effect of this entry on the stored account balance
    pub fn balance_delta(&self) -> BigDecimal {
        if self.affects_balance() {
            self.signed_amount()
        } else {
            BigDecimal::from(0)
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(self.link, TransactionLink::TransferLeg { .. })
    }

    /// Correlation token when this entry is a transfer leg
    pub fn transfer_token(&self) -> Option<&str> {
        match &self.link {
            TransactionLink::TransferLeg { token, .. } => Some(token),
            _ => None,
        }
    }

    /// Transfer role when this entry is a transfer leg
    pub fn leg_role(&self) -> Option<LegRole> {
        match &self.link {
            TransactionLink::TransferLeg { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Rule and occurrence date when this entry came from a recurring rule
    pub fn recurring_origin(&self) -> Option<(&str, NaiveDate)> {
        match &self.link {
            TransactionLink::Recurring {
                rule_id,
                occurrence_date,
            } => Some((rule_id, *occurrence_date)),
            _ => None,
        }
    }
}

/// Input for creating a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub date: NaiveDate,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub applied: Option<bool>,
}

impl NewTransaction {
    pub fn new(
        account_id: impl Into<String>,
        kind: TransactionKind,
        amount: BigDecimal,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            kind,
            amount,
            date,
            description: description.into(),
            category_id: None,
            icon: None,
            color: None,
            applied: None,
        }
    }

    /// Income entry
    pub fn income(
        account_id: impl Into<String>,
        amount: BigDecimal,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self::new(account_id, TransactionKind::Income, amount, date, description)
    }

    /// Expense entry
    pub fn expense(
        account_id: impl Into<String>,
        amount: BigDecimal,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self::new(account_id, TransactionKind::Expense, amount, date, description)
    }

    /// Savings entry
    pub fn saving(
        account_id: impl Into<String>,
        amount: BigDecimal,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self::new(account_id, TransactionKind::Saving, amount, date, description)
    }

    pub fn category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    pub fn icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    /// Set the explicit applied flag
    pub fn applied(mut self, applied: bool) -> Self {
        self.applied = Some(applied);
        self
    }
}

/// Partial update for a transaction.
///
/// Outer `None` leaves a field untouched; for optional fields `Some(None)`
/// clears the value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransactionPatch {
    pub account_id: Option<String>,
    pub kind: Option<TransactionKind>,
    pub amount: Option<BigDecimal>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    pub category_id: Option<Option<String>>,
    pub icon: Option<Option<String>>,
    pub color: Option<Option<String>>,
    pub applied: Option<Option<bool>>,
    /// Reject the update unless the stored version still matches
    pub expected_version: Option<u64>,
}

impl TransactionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn kind(mut self, kind: TransactionKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn amount(mut self, amount: BigDecimal) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn category(mut self, category_id: Option<String>) -> Self {
        self.category_id = Some(category_id);
        self
    }

    pub fn icon(mut self, icon: Option<String>) -> Self {
        self.icon = Some(icon);
        self
    }

    pub fn color(mut self, color: Option<String>) -> Self {
        self.color = Some(color);
        self
    }

    pub fn applied(mut self, applied: Option<bool>) -> Self {
        self.applied = Some(applied);
        self
    }

    pub fn expect_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    /// Whether the patch changes the amount, sign, account or posting of an entry
    pub fn touches_money(&self) -> bool {
        self.account_id.is_some()
            || self.kind.is_some()
            || self.amount.is_some()
            || self.applied.is_some()
    }

    /// Produce the patched copy of `transaction` with its version bumped
    pub fn apply_to(&self, transaction: &Transaction) -> Transaction {
        let mut updated = transaction.clone();
        if let Some(account_id) = &self.account_id {
            updated.account_id = account_id.clone();
        }
        if let Some(kind) = self.kind {
            updated.kind = kind;
        }
        if let Some(amount) = &self.amount {
            updated.amount = amount.clone();
        }
        if let Some(date) = self.date {
            updated.date = date;
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(category_id) = &self.category_id {
            updated.category_id = category_id.clone();
        }
        if let Some(icon) = &self.icon {
            updated.icon = icon.clone();
        }
        if let Some(color) = &self.color {
            updated.color = color.clone();
        }
        if let Some(applied) = self.applied {
            updated.applied = applied;
        }
        updated.version = transaction.version + 1;
        updated.updated_at = chrono::Utc::now().naive_utc();
        updated
    }
}

/// Which transfer operation a partial failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOperation {
    Create,
    Delete,
}

impl fmt::Display for TransferOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferOperation::Create => f.write_str("create"),
            TransferOperation::Delete => f.write_str("delete"),
        }
    }
}

/// Errors that can occur in the ledger system
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),
    #[error("Recurring rule not found: {0}")]
    RuleNotFound(String),
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),
    #[error(
        "Transfer {token} partially failed during {operation}: {surviving_role} leg \
         {surviving_transaction_id} survived ({reason})"
    )]
    PartialFailure {
        token: String,
        operation: TransferOperation,
        surviving_role: LegRole,
        surviving_transaction_id: String,
        reason: String,
    },
    #[error("Occurrence {occurrence_date} of rule {rule_id} already applied as {transaction_id}")]
    AlreadyApplied {
        rule_id: String,
        occurrence_date: NaiveDate,
        transaction_id: String,
    },
    #[error("Concurrency conflict: {0}")]
    ConcurrencyConflict(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::AccountNotFound(_)
                | LedgerError::TransactionNotFound(_)
                | LedgerError::RuleNotFound(_)
                | LedgerError::TransferNotFound(_)
        )
    }

    pub fn is_partial_failure(&self) -> bool {
        matches!(self, LedgerError::PartialFailure { .. })
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
