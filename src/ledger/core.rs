//! Main ledger orchestrator that coordinates accounts, entries, transfers and
//! recurring rules over one storage backend and one set of account locks

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clock::{CanonicalClock, ReferenceClock};
use crate::config::{LedgerConfig, DEFAULT_MAX_OCCURRENCES};
use crate::ledger::account::{AccountStore, BalanceCheck};
use crate::ledger::classifier::{is_applied_on, EntryStatus, PendingStateClassifier};
use crate::ledger::recurring::{
    generate_occurrences_capped, NewRecurringRule, RecurringOccurrence, RecurringRule,
    RecurringRuleEngine,
};
use crate::ledger::transaction::TransactionLedger;
use crate::ledger::transfer::{Transfer, TransferCoordinator, TransferSnapshot};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{EnhancedAccountValidator, EnhancedTransactionValidator};
use crate::utils::AccountLocks;

/// Main ledger system; every operation takes `&self`, so it can be shared
/// behind an `Arc`
pub struct Ledger<S: LedgerStorage> {
    accounts: AccountStore<S>,
    transactions: TransactionLedger<S>,
    transfers: TransferCoordinator<S>,
    recurring: RecurringRuleEngine<S>,
    classifier: PendingStateClassifier,
}

impl<S: LedgerStorage + Clone> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            accounts: self.accounts.clone(),
            transactions: self.transactions.clone(),
            transfers: self.transfers.clone(),
            recurring: self.recurring.clone(),
            classifier: self.classifier.clone(),
        }
    }
}

impl<S: LedgerStorage + Clone> Ledger<S> {
    /// Create a new ledger with the given storage backend and a UTC clock
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, Arc::new(CanonicalClock::utc()))
    }

    /// Create a ledger whose notion of today comes from `clock`
    pub fn with_clock(storage: S, clock: Arc<dyn ReferenceClock>) -> Self {
        Self::with_validators(
            storage,
            clock,
            Arc::new(EnhancedAccountValidator),
            Arc::new(EnhancedTransactionValidator),
        )
    }

    /// Create a ledger from loaded configuration
    pub fn with_config(storage: S, config: &LedgerConfig) -> LedgerResult<Self> {
        config.validate()?;
        let mut ledger = Self::with_clock(storage, config.clock()?);
        ledger.recurring = RecurringRuleEngine::new(ledger.transactions.clone(), config.max_occurrences);
        Ok(ledger)
    }

    /// Create a new ledger with custom validators
    pub fn with_validators(
        storage: S,
        clock: Arc<dyn ReferenceClock>,
        account_validator: Arc<dyn AccountValidator>,
        transaction_validator: Arc<dyn TransactionValidator>,
    ) -> Self {
        let locks = Arc::new(AccountLocks::new());
        let transactions =
            TransactionLedger::with_validator(storage.clone(), locks.clone(), transaction_validator);
        Self {
            accounts: AccountStore::with_validator(storage, locks, account_validator),
            transfers: TransferCoordinator::new(transactions.clone()),
            recurring: RecurringRuleEngine::new(transactions.clone(), DEFAULT_MAX_OCCURRENCES),
            transactions,
            classifier: PendingStateClassifier::new(clock),
        }
    }
}

impl<S: LedgerStorage> Ledger<S> {
    pub fn accounts(&self) -> &AccountStore<S> {
        &self.accounts
    }

    pub fn transactions(&self) -> &TransactionLedger<S> {
        &self.transactions
    }

    pub fn transfers(&self) -> &TransferCoordinator<S> {
        &self.transfers
    }

    pub fn recurring(&self) -> &RecurringRuleEngine<S> {
        &self.recurring
    }

    pub fn classifier(&self) -> &PendingStateClassifier {
        &self.classifier
    }

    /// Today according to the canonical clock
    pub fn today(&self) -> NaiveDate {
        self.classifier.today()
    }

    // Account operations
    /// Create a new account
    pub async fn create_account(
        &self,
        id: String,
        name: String,
        account_type: AccountType,
        initial_balance: BigDecimal,
    ) -> LedgerResult<Account> {
        self.accounts
            .create_account(id, name, account_type, initial_balance)
            .await
    }

    /// Get an account by ID
    pub async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.accounts.get_account(account_id).await
    }

    /// List all accounts
    pub async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        self.accounts.list_accounts().await
    }

    pub async fn rename_account(&self, account_id: &str, name: String) -> LedgerResult<Account> {
        self.accounts.rename_account(account_id, name).await
    }

    pub async fn set_initial_balance(
        &self,
        account_id: &str,
        initial_balance: BigDecimal,
    ) -> LedgerResult<Account> {
        self.accounts
            .set_initial_balance(account_id, initial_balance)
            .await
    }

    /// Delete an account
    pub async fn delete_account(&self, account_id: &str) -> LedgerResult<Account> {
        self.accounts.delete_account(account_id).await
    }

    // Transaction operations
    /// Record a new transaction
    pub async fn create_transaction(&self, input: NewTransaction) -> LedgerResult<Transaction> {
        self.transactions.create(input).await
    }

    /// Get a transaction by ID
    pub async fn get_transaction(&self, transaction_id: &str) -> LedgerResult<Option<Transaction>> {
        self.transactions.get(transaction_id).await
    }

    pub async fn list_transactions(&self, query: &TransactionQuery) -> LedgerResult<Vec<Transaction>> {
        self.transactions.list(query).await
    }

    /// Update a transaction
    pub async fn update_transaction(
        &self,
        transaction_id: &str,
        patch: TransactionPatch,
    ) -> LedgerResult<Transaction> {
        self.transactions.update(transaction_id, patch).await
    }

    /// Delete a transaction
    pub async fn delete_transaction(&self, transaction_id: &str) -> LedgerResult<Transaction> {
        self.transactions.delete(transaction_id).await
    }

    // Transfer operations
    pub async fn create_transfer(
        &self,
        origin_account_id: &str,
        destination_account_id: &str,
        amount: BigDecimal,
        date: NaiveDate,
        description: &str,
    ) -> LedgerResult<Transfer> {
        self.transfers
            .create_transfer(origin_account_id, destination_account_id, amount, date, description)
            .await
    }

    pub async fn get_transfer(&self, token: &str) -> LedgerResult<Transfer> {
        self.transfers.get_transfer(token).await
    }

    pub async fn delete_transfer(&self, token: &str) -> LedgerResult<TransferSnapshot> {
        self.transfers.delete_transfer(token).await
    }

    pub async fn undo_delete_transfer(&self, snapshot: &TransferSnapshot) -> LedgerResult<Transfer> {
        self.transfers.undo_delete(snapshot).await
    }

    // Recurring operations
    pub async fn create_recurring_rule(&self, input: NewRecurringRule) -> LedgerResult<RecurringRule> {
        self.recurring.create_rule(input).await
    }

    pub async fn get_recurring_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>> {
        self.recurring.get_rule(rule_id).await
    }

    pub async fn list_recurring_rules(
        &self,
        account_id: Option<&str>,
    ) -> LedgerResult<Vec<RecurringRule>> {
        self.recurring.list_rules(account_id).await
    }

    pub async fn recurring_occurrences(
        &self,
        rule_id: &str,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> LedgerResult<Vec<RecurringOccurrence>> {
        self.recurring
            .occurrences(rule_id, window_start, window_end)
            .await
    }

    pub async fn apply_recurring(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
    ) -> LedgerResult<Transaction> {
        self.recurring.apply(rule_id, occurrence_date).await
    }

    pub async fn skip_recurring(&self, rule_id: &str, occurrence_date: NaiveDate) -> LedgerResult<()> {
        self.recurring.skip(rule_id, occurrence_date).await
    }

    pub async fn postpone_recurring(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
        days: u32,
    ) -> LedgerResult<NaiveDate> {
        self.recurring.postpone(rule_id, occurrence_date, days).await
    }

    pub async fn delete_recurring_rule(&self, rule_id: &str) -> LedgerResult<RecurringRule> {
        self.recurring.delete_rule(rule_id).await
    }

    /// Materialize every occurrence that has taken effect by today
    pub async fn apply_due_recurring(&self) -> LedgerResult<Vec<Transaction>> {
        self.recurring.apply_due(self.today()).await
    }

    // Read-side views
    pub fn is_applied(&self, transaction: &Transaction) -> bool {
        self.classifier.is_applied(transaction)
    }

    /// Applied and pending totals of one account as of today
    pub async fn account_summary(&self, account_id: &str) -> LedgerResult<AccountSummary> {
        let account = self.accounts.get_account_required(account_id).await?;
        let entries = self
            .transactions
            .list(&TransactionQuery::new().account(account_id))
            .await?;

        let today = self.today();
        let mut summary = AccountSummary::empty(&account, today);
        for entry in &entries {
            if entry.is_transfer_leg() {
                if is_applied_on(entry, today) {
                    summary.net_transfers += entry.signed_amount();
                }
                continue;
            }
            summary.add(entry, is_applied_on(entry, today));
        }
        Ok(summary)
    }

    /// Entries and unapplied recurring occurrences in `[start, end]`, by date
    pub async fn calendar(&self, start: NaiveDate, end: NaiveDate) -> LedgerResult<Vec<CalendarEntry>> {
        if end < start {
            return Err(LedgerError::Validation(format!(
                "calendar window ends on {} before it starts on {}",
                end, start
            )));
        }
        let entries = self
            .transactions
            .list(&TransactionQuery::new().between(Some(start), Some(end)))
            .await?;
        let mut calendar: Vec<CalendarEntry> = entries
            .iter()
            .map(|entry| CalendarEntry::from_transaction(entry, self.classifier.status(entry)))
            .collect();

        for rule in self.recurring.list_rules(None).await? {
            let occurrences =
                generate_occurrences_capped(&rule, start, end, self.recurring.max_occurrences());
            calendar.extend(
                occurrences
                    .iter()
                    .filter(|o| rule.applied_transaction(o.occurrence_date).is_none())
                    .map(|o| CalendarEntry::from_occurrence(&rule, o)),
            );
        }

        calendar.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.account_id.cmp(&b.account_id)));
        Ok(calendar)
    }

    /// Balance expected on `until` once held entries post and scheduled
    /// occurrences from today on are applied
    pub async fn projected_balance(&self, account_id: &str, until: NaiveDate) -> LedgerResult<BigDecimal> {
        let account = self.accounts.get_account_required(account_id).await?;
        let mut projected = account.current_balance.clone();

        let held = self
            .transactions
            .list(&TransactionQuery::new().account(account_id).between(None, Some(until)))
            .await?;
        for entry in held.iter().filter(|entry| !entry.affects_balance()) {
            projected += entry.signed_amount();
        }

        let today = self.today();
        for rule in self.recurring.list_rules(Some(account_id)).await? {
            let upcoming =
                generate_occurrences_capped(&rule, today, until, self.recurring.max_occurrences());
            for occurrence in upcoming {
                if rule.applied_transaction(occurrence.occurrence_date).is_none() {
                    projected += rule.kind.signed(&rule.amount);
                }
            }
        }
        Ok(projected)
    }

    pub async fn verify_balance(&self, account_id: &str) -> LedgerResult<BalanceCheck> {
        self.accounts.verify_balance(account_id).await
    }

    /// Validate the integrity of the ledger: stored balances, transfer pairs
    /// and recurring applied records
    pub async fn verify_all_balances(&self) -> LedgerResult<LedgerIntegrityReport> {
        let mut issues = Vec::new();
        let mut checks = Vec::new();

        for account in self.accounts.list_accounts().await? {
            let check = self.accounts.verify_balance(&account.id).await?;
            if !check.is_consistent() {
                issues.push(format!(
                    "Account '{}' records {} but its entries add up to {}",
                    check.account_id, check.recorded_balance, check.computed_balance
                ));
            }
            checks.push(check);
        }

        let entries = self.transactions.list(&TransactionQuery::new()).await?;
        let mut legs: BTreeMap<&str, usize> = BTreeMap::new();
        for token in entries.iter().filter_map(Transaction::transfer_token) {
            *legs.entry(token).or_default() += 1;
        }
        for (token, count) in legs.iter().filter(|(_, count)| **count != 2) {
            issues.push(format!("Transfer {} has {} legs", token, count));
        }

        for rule in self.recurring.list_rules(None).await? {
            for (occurrence_date, transaction_id) in &rule.applied {
                if self.transactions.get(transaction_id).await?.is_none() {
                    issues.push(format!(
                        "Rule {} marks {} applied as missing transaction {}",
                        rule.id, occurrence_date, transaction_id
                    ));
                }
            }
        }

        if !issues.is_empty() {
            tracing::warn!(issues = issues.len(), "ledger integrity check found problems");
        }
        Ok(LedgerIntegrityReport {
            as_of_date: self.today(),
            is_valid: issues.is_empty(),
            issues,
            checks,
        })
    }
}

/// Per-account totals split by the classifier. Transfer legs only count
/// toward `net_transfers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub account_id: String,
    pub as_of_date: NaiveDate,
    pub current_balance: BigDecimal,
    pub applied_income: BigDecimal,
    pub applied_expenses: BigDecimal,
    /// Applied savings (ahorro)
    pub saved: BigDecimal,
    pub pending_income: BigDecimal,
    pub pending_expenses: BigDecimal,
    pub pending_savings: BigDecimal,
    /// Signed sum of applied transfer legs
    pub net_transfers: BigDecimal,
}

impl AccountSummary {
    fn empty(account: &Account, as_of_date: NaiveDate) -> Self {
        let zero = BigDecimal::from(0);
        Self {
            account_id: account.id.clone(),
            as_of_date,
            current_balance: account.current_balance.clone(),
            applied_income: zero.clone(),
            applied_expenses: zero.clone(),
            saved: zero.clone(),
            pending_income: zero.clone(),
            pending_expenses: zero.clone(),
            pending_savings: zero.clone(),
            net_transfers: zero,
        }
    }

    fn add(&mut self, entry: &Transaction, applied: bool) {
        let bucket = match (entry.kind, applied) {
            (TransactionKind::Income, true) => &mut self.applied_income,
            (TransactionKind::Expense, true) => &mut self.applied_expenses,
            (TransactionKind::Saving, true) => &mut self.saved,
            (TransactionKind::Income, false) => &mut self.pending_income,
            (TransactionKind::Expense, false) => &mut self.pending_expenses,
            (TransactionKind::Saving, false) => &mut self.pending_savings,
        };
        *bucket += &entry.amount;
    }
}

/// Where a calendar row came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum CalendarSource {
    Transaction {
        transaction_id: String,
    },
    Occurrence {
        rule_id: String,
        occurrence_date: NaiveDate,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub description: String,
    pub status: EntryStatus,
    #[serde(flatten)]
    pub source: CalendarSource,
}

impl CalendarEntry {
    fn from_transaction(entry: &Transaction, status: EntryStatus) -> Self {
        Self {
            date: entry.date,
            account_id: entry.account_id.clone(),
            kind: entry.kind,
            amount: entry.amount.clone(),
            description: entry.description.clone(),
            status,
            source: CalendarSource::Transaction {
                transaction_id: entry.id.clone(),
            },
        }
    }

    fn from_occurrence(rule: &RecurringRule, occurrence: &RecurringOccurrence) -> Self {
        Self {
            date: occurrence.effective_date,
            account_id: rule.account_id.clone(),
            kind: rule.kind,
            amount: rule.amount.clone(),
            description: rule.description.clone(),
            status: EntryStatus::Scheduled,
            source: CalendarSource::Occurrence {
                rule_id: rule.id.clone(),
                occurrence_date: occurrence.occurrence_date,
            },
        }
    }
}

/// Report on ledger integrity and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerIntegrityReport {
    pub as_of_date: NaiveDate,
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub checks: Vec<BalanceCheck>,
}
