//! Recurring rules and their expansion into ledger entries.
//!
//! A rule describes a cadence (`start_date` stepped by `frequency`, bounded
//! by `end`). Occurrences are derived on demand and only become transactions
//! when applied. Each occurrence is keyed by its cadence date; skipping or
//! postponing one edits only that key.

use bigdecimal::BigDecimal;
use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::config::DEFAULT_MAX_OCCURRENCES;
use crate::ledger::transaction::TransactionLedger;
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::{validate_positive_amount, validate_transaction_description};
use crate::utils::AccountGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    /// The `index`-th cadence date counted from `start`.
    ///
    /// Monthly steps are taken from `start` itself and clamp to the end of
    /// shorter months, so a rule on the 31st lands on Feb 29 and then Mar 31.
    pub fn nth(&self, start: NaiveDate, index: u32) -> Option<NaiveDate> {
        match self {
            Frequency::Daily => start.checked_add_days(Days::new(u64::from(index))),
            Frequency::Weekly => start.checked_add_days(Days::new(u64::from(index) * 7)),
            Frequency::Monthly => start.checked_add_months(Months::new(index)),
        }
    }

    /// Smallest index whose cadence date is on or after `date`
    pub fn index_at_or_after(&self, start: NaiveDate, date: NaiveDate) -> u32 {
        if date <= start {
            return 0;
        }
        let days = (date - start).num_days();
        let raw = match self {
            Frequency::Daily => days,
            Frequency::Weekly => (days + 6) / 7,
            Frequency::Monthly => {
                i64::from(date.year() - start.year()) * 12 + i64::from(date.month())
                    - i64::from(start.month())
            }
        };
        let mut index = u32::try_from(raw.max(0)).unwrap_or(u32::MAX);
        if *self == Frequency::Monthly && self.nth(start, index).is_some_and(|d| d < date) {
            index = index.saturating_add(1);
        }
        index
    }

    pub fn label(&self) -> &'static str {
        match self {
            Frequency::Daily => "Daily",
            Frequency::Weekly => "Weekly",
            Frequency::Monthly => "Monthly",
        }
    }
}

/// When a rule stops producing occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "date", rename_all = "snake_case")]
pub enum RuleEnd {
    #[default]
    Indefinite,
    /// Last cadence date allowed (inclusive)
    Until(NaiveDate),
}

impl RuleEnd {
    pub fn allows(&self, date: NaiveDate) -> bool {
        match self {
            RuleEnd::Indefinite => true,
            RuleEnd::Until(end) => date <= *end,
        }
    }
}

/// A schedule definition plus the per-occurrence overrides recorded on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringRule {
    pub id: String,
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub description: String,
    pub category_id: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end: RuleEnd,
    /// Voided occurrences, by cadence date
    #[serde(default)]
    pub skip_dates: BTreeSet<NaiveDate>,
    /// Cadence date → effective date
    #[serde(default)]
    pub postponements: BTreeMap<NaiveDate, NaiveDate>,
    /// Cadence date → id of the transaction it was materialized as
    #[serde(default)]
    pub applied: BTreeMap<NaiveDate, String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl RecurringRule {
    /// Whether `date` is a cadence date of this rule within its end bound
    pub fn is_on_cadence(&self, date: NaiveDate) -> bool {
        if date < self.start_date || !self.end.allows(date) {
            return false;
        }
        let index = self.frequency.index_at_or_after(self.start_date, date);
        self.frequency.nth(self.start_date, index) == Some(date)
    }

    pub fn is_skipped(&self, occurrence_date: NaiveDate) -> bool {
        self.skip_dates.contains(&occurrence_date)
    }

    /// Date the occurrence takes effect, after any postponement
    pub fn effective_date(&self, occurrence_date: NaiveDate) -> NaiveDate {
        self.postponements
            .get(&occurrence_date)
            .copied()
            .unwrap_or(occurrence_date)
    }

    /// Transaction the occurrence was materialized as, if any
    pub fn applied_transaction(&self, occurrence_date: NaiveDate) -> Option<&str> {
        self.applied.get(&occurrence_date).map(String::as_str)
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().naive_utc();
    }

    /// Check that `occurrence_date` can still be acted upon
    fn ensure_open(&self, occurrence_date: NaiveDate) -> LedgerResult<()> {
        if let Some(transaction_id) = self.applied_transaction(occurrence_date) {
            return Err(LedgerError::AlreadyApplied {
                rule_id: self.id.clone(),
                occurrence_date,
                transaction_id: transaction_id.to_string(),
            });
        }
        if !self.is_on_cadence(occurrence_date) {
            return Err(LedgerError::Validation(format!(
                "{} is not an occurrence of rule {}",
                occurrence_date, self.id
            )));
        }
        Ok(())
    }

    fn materialize(&self, occurrence_date: NaiveDate) -> Transaction {
        let input = NewTransaction {
            account_id: self.account_id.clone(),
            kind: self.kind,
            amount: self.amount.clone(),
            date: self.effective_date(occurrence_date),
            description: self.description.clone(),
            category_id: self.category_id.clone(),
            icon: self.icon.clone(),
            color: self.color.clone(),
            applied: None,
        };
        Transaction::from_new(
            input,
            TransactionLink::Recurring {
                rule_id: self.id.clone(),
                occurrence_date,
            },
        )
    }
}

/// Input for creating a recurring rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecurringRule {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: BigDecimal,
    pub description: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end: RuleEnd,
}

impl NewRecurringRule {
    pub fn new(
        account_id: impl Into<String>,
        kind: TransactionKind,
        amount: BigDecimal,
        description: impl Into<String>,
        frequency: Frequency,
        start_date: NaiveDate,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            kind,
            amount,
            description: description.into(),
            category_id: None,
            icon: None,
            color: None,
            frequency,
            start_date,
            end: RuleEnd::Indefinite,
        }
    }

    /// Stop after `end_date` (inclusive)
    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end = RuleEnd::Until(end_date);
        self
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

    fn validate(&self) -> LedgerResult<()> {
        validate_positive_amount(&self.amount)?;
        validate_transaction_description(&self.description)?;
        if let RuleEnd::Until(end) = self.end {
            if end < self.start_date {
                return Err(LedgerError::Validation(format!(
                    "rule ends on {} before it starts on {}",
                    end, self.start_date
                )));
            }
        }
        Ok(())
    }

    fn into_rule(self) -> RecurringRule {
        let now = chrono::Utc::now().naive_utc();
        RecurringRule {
            id: Uuid::new_v4().to_string(),
            account_id: self.account_id,
            kind: self.kind,
            amount: self.amount,
            description: self.description,
            category_id: self.category_id,
            icon: self.icon,
            color: self.color,
            frequency: self.frequency,
            start_date: self.start_date,
            end: self.end,
            skip_dates: BTreeSet::new(),
            postponements: BTreeMap::new(),
            applied: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One scheduled date implied by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringOccurrence {
    pub rule_id: String,
    /// Cadence date; identifies the occurrence
    pub occurrence_date: NaiveDate,
    /// Date it takes effect
    pub effective_date: NaiveDate,
}

impl RecurringOccurrence {
    pub fn is_postponed(&self) -> bool {
        self.effective_date != self.occurrence_date
    }
}

/// Occurrences of `rule` whose effective date lies in
/// `[window_start, window_end]`, sorted by effective date.
///
/// Pure: same inputs, same output.
pub fn generate_occurrences(
    rule: &RecurringRule,
    window_start: NaiveDate,
    window_end: NaiveDate,
) -> Vec<RecurringOccurrence> {
    generate_occurrences_capped(rule, window_start, window_end, DEFAULT_MAX_OCCURRENCES)
}

/// [`generate_occurrences`] returning at most `max` occurrences
pub fn generate_occurrences_capped(
    rule: &RecurringRule,
    window_start: NaiveDate,
    window_end: NaiveDate,
    max: usize,
) -> Vec<RecurringOccurrence> {
    collect_occurrences(rule, window_start, window_end, max, |_| true)
}

/// Unapplied occurrences that have taken effect by `today`
pub fn due_occurrences(
    rule: &RecurringRule,
    today: NaiveDate,
    max: usize,
) -> Vec<RecurringOccurrence> {
    collect_occurrences(rule, rule.start_date, today, max, |occurrence| {
        rule.applied_transaction(occurrence.occurrence_date).is_none()
    })
}

fn collect_occurrences<F>(
    rule: &RecurringRule,
    window_start: NaiveDate,
    window_end: NaiveDate,
    max: usize,
    keep: F,
) -> Vec<RecurringOccurrence>
where
    F: Fn(&RecurringOccurrence) -> bool,
{
    let mut result = Vec::new();
    if window_end < window_start || max == 0 {
        return result;
    }
    let occurrence = |occurrence_date: NaiveDate, effective_date: NaiveDate| RecurringOccurrence {
        rule_id: rule.id.clone(),
        occurrence_date,
        effective_date,
    };

    // Cadence dates before the window that were postponed into it
    for (&base, &effective) in rule.postponements.range(..window_start) {
        if effective < window_start || effective > window_end {
            continue;
        }
        if rule.is_skipped(base) || !rule.is_on_cadence(base) {
            continue;
        }
        let candidate = occurrence(base, effective);
        if keep(&candidate) {
            result.push(candidate);
        }
    }

    let mut index = rule
        .frequency
        .index_at_or_after(rule.start_date, window_start);
    loop {
        let Some(base) = rule.frequency.nth(rule.start_date, index) else {
            break;
        };
        if base > window_end || !rule.end.allows(base) {
            break;
        }
        if result.len() >= max {
            // Postponing only moves a date later, so nothing from `base` on can
            // take effect before the last occurrence kept so far
            result.sort_by_key(|o| (o.effective_date, o.occurrence_date));
            result.truncate(max);
            if result.last().is_some_and(|last| base >= last.effective_date) {
                break;
            }
        }
        let Some(next) = index.checked_add(1) else {
            break;
        };
        index = next;

        if rule.is_skipped(base) {
            continue;
        }
        let effective = rule.effective_date(base);
        if effective > window_end {
            continue;
        }
        let candidate = occurrence(base, effective);
        if keep(&candidate) {
            result.push(candidate);
        }
    }

    result.sort_by_key(|o| (o.effective_date, o.occurrence_date));
    result.truncate(max);
    tracing::debug!(rule_id = %rule.id, count = result.len(), "expanded occurrences");
    result
}

/// Creates rules and turns their occurrences into ledger entries.
///
/// `apply`, `skip` and `postpone` run under the rule account's lock, and the
/// rule edit lands in the same commit as any transaction it produces.
pub struct RecurringRuleEngine<S: LedgerStorage> {
    ledger: TransactionLedger<S>,
    max_occurrences: usize,
}

impl<S: LedgerStorage + Clone> Clone for RecurringRuleEngine<S> {
    fn clone(&self) -> Self {
        Self {
            ledger: self.ledger.clone(),
            max_occurrences: self.max_occurrences,
        }
    }
}

impl<S: LedgerStorage> RecurringRuleEngine<S> {
    pub fn new(ledger: TransactionLedger<S>, max_occurrences: usize) -> Self {
        Self {
            ledger,
            max_occurrences: max_occurrences.max(1),
        }
    }

    pub fn max_occurrences(&self) -> usize {
        self.max_occurrences
    }

    #[tracing::instrument(skip(self, input), fields(account_id = %input.account_id))]
    pub async fn create_rule(&self, input: NewRecurringRule) -> LedgerResult<RecurringRule> {
        input.validate()?;
        let _guard = self.ledger.locks.acquire([input.account_id.clone()]).await?;
        self.ledger.account_required(&input.account_id).await?;

        let rule = input.into_rule();
        self.ledger
            .storage
            .commit(WriteBatch::new().put_rule(rule.clone()))
            .await?;
        tracing::info!(
            rule_id = %rule.id,
            frequency = rule.frequency.label(),
            start = %rule.start_date,
            "recurring rule created"
        );
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>> {
        self.ledger.storage.get_rule(rule_id).await
    }

    pub async fn get_rule_required(&self, rule_id: &str) -> LedgerResult<RecurringRule> {
        self.ledger
            .storage
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| LedgerError::RuleNotFound(rule_id.to_string()))
    }

    pub async fn list_rules(&self, account_id: Option<&str>) -> LedgerResult<Vec<RecurringRule>> {
        self.ledger.storage.list_rules(account_id).await
    }

    /// Occurrences of a stored rule in a window
    pub async fn occurrences(
        &self,
        rule_id: &str,
        window_start: NaiveDate,
        window_end: NaiveDate,
    ) -> LedgerResult<Vec<RecurringOccurrence>> {
        let rule = self.get_rule_required(rule_id).await?;
        Ok(generate_occurrences_capped(
            &rule,
            window_start,
            window_end,
            self.max_occurrences,
        ))
    }

    /// Materialize one occurrence as a transaction on its effective date.
    ///
    /// A second call for the same occurrence returns
    /// [`LedgerError::AlreadyApplied`].
    #[tracing::instrument(skip(self))]
    pub async fn apply(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
    ) -> LedgerResult<Transaction> {
        let (_guard, mut rule) = self.lock_rule(rule_id).await?;
        rule.ensure_open(occurrence_date)?;
        if rule.is_skipped(occurrence_date) {
            return Err(LedgerError::Validation(format!(
                "occurrence {} of rule {} was skipped",
                occurrence_date, rule_id
            )));
        }

        let transaction = rule.materialize(occurrence_date);
        rule.applied
            .insert(occurrence_date, transaction.id.clone());
        rule.touch();

        let transaction = self
            .ledger
            .insert_locked(transaction, WriteBatch::new().put_rule(rule))
            .await?;
        tracing::info!(
            rule_id,
            %occurrence_date,
            transaction_id = %transaction.id,
            "recurring occurrence applied"
        );
        Ok(transaction)
    }

    /// Void an occurrence without creating a transaction
    #[tracing::instrument(skip(self))]
    pub async fn skip(&self, rule_id: &str, occurrence_date: NaiveDate) -> LedgerResult<()> {
        let (_guard, mut rule) = self.lock_rule(rule_id).await?;
        rule.ensure_open(occurrence_date)?;
        if rule.is_skipped(occurrence_date) {
            return Ok(());
        }

        rule.skip_dates.insert(occurrence_date);
        rule.postponements.remove(&occurrence_date);
        rule.touch();
        self.ledger
            .storage
            .commit(WriteBatch::new().put_rule(rule))
            .await?;
        tracing::info!(rule_id, %occurrence_date, "recurring occurrence skipped");
        Ok(())
    }

    /// Move one occurrence's effective date forward by `days`; returns the new date
    #[tracing::instrument(skip(self))]
    pub async fn postpone(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
        days: u32,
    ) -> LedgerResult<NaiveDate> {
        if days == 0 {
            return Err(LedgerError::Validation(
                "postponement must be at least one day".to_string(),
            ));
        }
        let (_guard, mut rule) = self.lock_rule(rule_id).await?;
        rule.ensure_open(occurrence_date)?;
        if rule.is_skipped(occurrence_date) {
            return Err(LedgerError::Validation(format!(
                "occurrence {} of rule {} was skipped",
                occurrence_date, rule_id
            )));
        }

        let new_date = rule
            .effective_date(occurrence_date)
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| LedgerError::Validation("postponed date out of range".to_string()))?;
        rule.postponements.insert(occurrence_date, new_date);
        rule.touch();
        self.ledger
            .storage
            .commit(WriteBatch::new().put_rule(rule))
            .await?;
        tracing::info!(rule_id, %occurrence_date, %new_date, "recurring occurrence postponed");
        Ok(new_date)
    }

    /// Remove a rule. Transactions it already produced stay in the ledger.
    #[tracing::instrument(skip(self))]
    pub async fn delete_rule(&self, rule_id: &str) -> LedgerResult<RecurringRule> {
        let (_guard, rule) = self.lock_rule(rule_id).await?;
        self.ledger
            .storage
            .commit(WriteBatch::new().remove_rule(rule.id.clone()))
            .await?;
        tracing::info!(rule_id, applied = rule.applied.len(), "recurring rule deleted");
        Ok(rule)
    }

    /// Unapplied occurrences of one rule that have taken effect by `today`
    pub async fn due(&self, rule_id: &str, today: NaiveDate) -> LedgerResult<Vec<RecurringOccurrence>> {
        let rule = self.get_rule_required(rule_id).await?;
        Ok(due_occurrences(&rule, today, self.max_occurrences))
    }

    /// Apply every due occurrence of every rule
    pub async fn apply_due(&self, today: NaiveDate) -> LedgerResult<Vec<Transaction>> {
        let mut created = Vec::new();
        for rule in self.list_rules(None).await? {
            for occurrence in due_occurrences(&rule, today, self.max_occurrences) {
                match self.apply(&rule.id, occurrence.occurrence_date).await {
                    Ok(transaction) => created.push(transaction),
                    // Someone else applied or removed it since we looked
                    Err(LedgerError::AlreadyApplied { .. }) | Err(LedgerError::RuleNotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(created)
    }

    /// Lock the rule's account and re-read the rule under that lock
    async fn lock_rule(&self, rule_id: &str) -> LedgerResult<(AccountGuard, RecurringRule)> {
        let rule = self.get_rule_required(rule_id).await?;
        let guard = self.ledger.locks.acquire([rule.account_id.clone()]).await?;
        let rule = self.get_rule_required(rule_id).await?;
        Ok((guard, rule))
    }
}
