//! Integration tests for finance-ledger

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use finance_ledger::{
    generate_occurrences, Account, AccountType, FixedClock, Frequency, LedgerError, LedgerStorage,
    LegRole, Ledger, LedgerResult, MemoryStorage, NewRecurringRule, NewTransaction, RecurringRule,
    TransactionKind, TransactionPatch, TransactionQuery, TransferOperation, WriteBatch,
};
use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

async fn balance<S: LedgerStorage + Clone>(ledger: &Ledger<S>, account_id: &str) -> BigDecimal {
    ledger
        .get_account(account_id)
        .await
        .unwrap()
        .unwrap()
        .current_balance
}

fn ledger_on(today: NaiveDate) -> Ledger<MemoryStorage> {
    Ledger::with_clock(MemoryStorage::new(), Arc::new(FixedClock::new(today)))
}

/// Storage that rejects chosen commits, counted from 1 after `fail_commits`
#[derive(Clone)]
struct FaultyStorage {
    inner: MemoryStorage,
    multi_account: bool,
    commits: Arc<AtomicUsize>,
    failing: Arc<Mutex<BTreeSet<usize>>>,
}

impl FaultyStorage {
    fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            multi_account: true,
            commits: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// A backend that commits one account at a time
    fn leg_by_leg() -> Self {
        Self {
            multi_account: false,
            ..Self::new()
        }
    }

    fn fail_commits(&self, upcoming: &[usize]) {
        let done = self.commits.load(Ordering::SeqCst);
        let mut failing = self.failing.lock().unwrap();
        failing.extend(upcoming.iter().map(|n| done + n));
    }
}

#[async_trait]
impl LedgerStorage for FaultyStorage {
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.inner.get_account(account_id).await
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        self.inner.list_accounts(account_type).await
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<finance_ledger::Transaction>> {
        self.inner.get_transaction(transaction_id).await
    }

    async fn query_transactions(
        &self,
        query: &TransactionQuery,
    ) -> LedgerResult<Vec<finance_ledger::Transaction>> {
        self.inner.query_transactions(query).await
    }

    async fn get_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>> {
        self.inner.get_rule(rule_id).await
    }

    async fn list_rules(&self, account_id: Option<&str>) -> LedgerResult<Vec<RecurringRule>> {
        self.inner.list_rules(account_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing.lock().unwrap().remove(&n) {
            return Err(LedgerError::Storage(format!("commit {} rejected", n)));
        }
        self.inner.commit(batch).await
    }

    fn multi_account_commits(&self) -> bool {
        self.multi_account
    }
}

/// Records what an unlocked reader sees after every commit
#[derive(Clone)]
struct SnapshotStorage {
    inner: MemoryStorage,
    seen: Arc<Mutex<Vec<(usize, BigDecimal, BigDecimal)>>>,
}

impl SnapshotStorage {
    fn new() -> Self {
        Self {
            inner: MemoryStorage::new(),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LedgerStorage for SnapshotStorage {
    async fn get_account(&self, account_id: &str) -> LedgerResult<Option<Account>> {
        self.inner.get_account(account_id).await
    }

    async fn list_accounts(&self, account_type: Option<AccountType>) -> LedgerResult<Vec<Account>> {
        self.inner.list_accounts(account_type).await
    }

    async fn get_transaction(
        &self,
        transaction_id: &str,
    ) -> LedgerResult<Option<finance_ledger::Transaction>> {
        self.inner.get_transaction(transaction_id).await
    }

    async fn query_transactions(
        &self,
        query: &TransactionQuery,
    ) -> LedgerResult<Vec<finance_ledger::Transaction>> {
        self.inner.query_transactions(query).await
    }

    async fn get_rule(&self, rule_id: &str) -> LedgerResult<Option<RecurringRule>> {
        self.inner.get_rule(rule_id).await
    }

    async fn list_rules(&self, account_id: Option<&str>) -> LedgerResult<Vec<RecurringRule>> {
        self.inner.list_rules(account_id).await
    }

    async fn commit(&self, batch: WriteBatch) -> LedgerResult<()> {
        self.inner.commit(batch).await?;
        let legs = self
            .inner
            .query_transactions(&TransactionQuery::new())
            .await?
            .iter()
            .filter(|entry| entry.is_transfer_leg())
            .count();
        let balance_of = |account: Option<Account>| {
            account.map(|a| a.current_balance).unwrap_or_default()
        };
        let a = balance_of(self.inner.get_account("a").await?);
        let b = balance_of(self.inner.get_account("b").await?);
        self.seen.lock().unwrap().push((legs, a, b));
        Ok(())
    }
}

#[tokio::test]
async fn test_income_expense_delete_round_trip() {
    let ledger = ledger_on(date(2024, 1, 31));
    ledger
        .create_account("x".into(), "Checking".into(), AccountType::Bank, dec("100.00"))
        .await
        .unwrap();

    ledger
        .create_transaction(NewTransaction::income("x", dec("50"), date(2024, 1, 2), "Freelance"))
        .await
        .unwrap();
    assert_eq!(balance(&ledger, "x").await, dec("150.00"));

    let groceries = ledger
        .create_transaction(NewTransaction::expense("x", dec("30"), date(2024, 1, 3), "Groceries"))
        .await
        .unwrap();
    assert_eq!(balance(&ledger, "x").await, dec("120.00"));

    ledger.delete_transaction(&groceries.id).await.unwrap();
    assert_eq!(balance(&ledger, "x").await, dec("150.00"));
    assert!(ledger.verify_balance("x").await.unwrap().is_consistent());
}

#[tokio::test]
async fn test_transfer_creates_two_linked_legs() {
    let ledger = ledger_on(date(2024, 1, 31));
    ledger
        .create_account("a".into(), "Checking".into(), AccountType::Bank, dec("150"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "Savings".into(), AccountType::Savings, dec("0"))
        .await
        .unwrap();

    let transfer = ledger
        .create_transfer("a", "b", dec("40"), date(2024, 1, 10), "Monthly saving")
        .await
        .unwrap();
    assert_eq!(balance(&ledger, "a").await, dec("110"));
    assert_eq!(balance(&ledger, "b").await, dec("40"));

    let legs = ledger
        .list_transactions(&TransactionQuery::new().transfer_token(transfer.token.clone()))
        .await
        .unwrap();
    assert_eq!(legs.len(), 2);
    let roles: HashSet<_> = legs.iter().filter_map(|leg| leg.leg_role()).collect();
    assert_eq!(roles, [LegRole::Debit, LegRole::Credit].into_iter().collect());
    let accounts: BTreeSet<_> = legs.iter().map(|leg| leg.account_id.as_str()).collect();
    assert_eq!(accounts.len(), 2);
    assert!(legs.iter().all(|leg| leg.amount == dec("40")));
}

#[tokio::test]
async fn test_skipped_month_is_not_generated_or_applied() {
    let ledger = ledger_on(date(2024, 3, 15));
    ledger
        .create_account("bank".into(), "Bank".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    let rule = ledger
        .create_recurring_rule(NewRecurringRule::new(
            "bank",
            TransactionKind::Expense,
            dec("800"),
            "Rent",
            Frequency::Monthly,
            date(2024, 1, 1),
        ))
        .await
        .unwrap();

    ledger.skip_recurring(&rule.id, date(2024, 2, 1)).await.unwrap();
    let occurrences = ledger
        .recurring_occurrences(&rule.id, date(2024, 1, 1), date(2024, 3, 1))
        .await
        .unwrap();
    let dates: Vec<_> = occurrences.iter().map(|o| o.effective_date).collect();
    assert_eq!(dates, vec![date(2024, 1, 1), date(2024, 3, 1)]);

    assert!(ledger.apply_recurring(&rule.id, date(2024, 2, 1)).await.is_err());
    let materialized = ledger
        .list_transactions(&TransactionQuery::new().rule(rule.id.clone()))
        .await
        .unwrap();
    assert!(materialized.is_empty());
}

#[tokio::test]
async fn test_apply_recurring_twice_creates_one_entry() {
    let ledger = ledger_on(date(2024, 3, 15));
    ledger
        .create_account("bank".into(), "Bank".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    let rule = ledger
        .create_recurring_rule(NewRecurringRule::new(
            "bank",
            TransactionKind::Income,
            dec("2500"),
            "Salary",
            Frequency::Monthly,
            date(2024, 1, 25),
        ))
        .await
        .unwrap();

    let first = ledger.apply_recurring(&rule.id, date(2024, 2, 25)).await.unwrap();
    match ledger.apply_recurring(&rule.id, date(2024, 2, 25)).await {
        Err(LedgerError::AlreadyApplied { transaction_id, .. }) => {
            assert_eq!(transaction_id, first.id)
        }
        other => panic!("expected AlreadyApplied, got {:?}", other),
    }
    assert_eq!(balance(&ledger, "bank").await, dec("2500"));

    // Deleting the entry frees the occurrence again
    ledger.delete_transaction(&first.id).await.unwrap();
    ledger.apply_recurring(&rule.id, date(2024, 2, 25)).await.unwrap();
    assert_eq!(balance(&ledger, "bank").await, dec("2500"));
}

#[tokio::test]
async fn test_apply_due_catches_up_to_today() {
    let ledger = ledger_on(date(2024, 1, 10));
    ledger
        .create_account("bank".into(), "Bank".into(), AccountType::Bank, dec("100"))
        .await
        .unwrap();
    ledger
        .create_recurring_rule(
            NewRecurringRule::new(
                "bank",
                TransactionKind::Saving,
                dec("5"),
                "Round-up",
                Frequency::Weekly,
                date(2024, 1, 1),
            )
            .until(date(2024, 12, 31)),
        )
        .await
        .unwrap();

    let created = ledger.apply_due_recurring().await.unwrap();
    assert_eq!(created.len(), 2);
    assert!(ledger.apply_due_recurring().await.unwrap().is_empty());
    assert_eq!(balance(&ledger, "bank").await, dec("90"));
}

#[tokio::test]
async fn test_postpone_moves_only_one_occurrence() {
    let ledger = ledger_on(date(2024, 1, 1));
    ledger
        .create_account("bank".into(), "Bank".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    let rule = ledger
        .create_recurring_rule(NewRecurringRule::new(
            "bank",
            TransactionKind::Expense,
            dec("9.99"),
            "Streaming",
            Frequency::Weekly,
            date(2024, 1, 1),
        ))
        .await
        .unwrap();

    let before = ledger
        .recurring_occurrences(&rule.id, date(2024, 1, 1), date(2024, 2, 29))
        .await
        .unwrap();
    let moved = ledger
        .postpone_recurring(&rule.id, date(2024, 1, 15), 2)
        .await
        .unwrap();
    assert_eq!(moved, date(2024, 1, 17));
    let after = ledger
        .recurring_occurrences(&rule.id, date(2024, 1, 1), date(2024, 2, 29))
        .await
        .unwrap();

    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.occurrence_date, new.occurrence_date);
        if old.occurrence_date == date(2024, 1, 15) {
            assert_eq!(new.effective_date, date(2024, 1, 17));
        } else {
            assert_eq!(old.effective_date, new.effective_date);
        }
    }

    // The stored rule and a pure expansion agree
    let stored = ledger.get_recurring_rule(&rule.id).await.unwrap().unwrap();
    assert_eq!(generate_occurrences(&stored, date(2024, 1, 1), date(2024, 2, 29)), after);
}

#[tokio::test]
async fn test_deleting_a_rule_keeps_its_entries() {
    let ledger = ledger_on(date(2024, 1, 1));
    ledger
        .create_account("bank".into(), "Bank".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    let rule = ledger
        .create_recurring_rule(NewRecurringRule::new(
            "bank",
            TransactionKind::Expense,
            dec("12"),
            "Gym",
            Frequency::Monthly,
            date(2024, 1, 1),
        ))
        .await
        .unwrap();
    let entry = ledger.apply_recurring(&rule.id, date(2024, 1, 1)).await.unwrap();

    ledger.delete_recurring_rule(&rule.id).await.unwrap();
    assert!(ledger.get_transaction(&entry.id).await.unwrap().is_some());
    assert!(matches!(
        ledger.apply_recurring(&rule.id, date(2024, 2, 1)).await,
        Err(LedgerError::RuleNotFound(_))
    ));
    // Nothing left pointing at the rule, so the entry deletes cleanly
    ledger.delete_transaction(&entry.id).await.unwrap();
    assert_eq!(balance(&ledger, "bank").await, dec("0"));
}

#[tokio::test]
async fn test_failed_transfer_leaves_no_legs() {
    let storage = FaultyStorage::new();
    let ledger = Ledger::new(storage.clone());
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("100"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "B".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();

    storage.fail_commits(&[1]);
    let result = ledger
        .create_transfer("a", "b", dec("25"), date(2024, 1, 1), "Move")
        .await;
    assert!(matches!(result, Err(LedgerError::Storage(_))));
    assert!(ledger
        .list_transactions(&TransactionQuery::new())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(balance(&ledger, "a").await, dec("100"));
    assert_eq!(balance(&ledger, "b").await, dec("0"));
    assert!(ledger.verify_all_balances().await.unwrap().is_valid);
}

#[tokio::test]
async fn test_unrecoverable_transfer_reports_surviving_leg() {
    let storage = FaultyStorage::leg_by_leg();
    let ledger = Ledger::new(storage.clone());
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("100"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "B".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();

    storage.fail_commits(&[2, 3]);
    let err = ledger
        .create_transfer("a", "b", dec("25"), date(2024, 1, 1), "Move")
        .await
        .unwrap_err();
    assert!(err.is_partial_failure());
    let LedgerError::PartialFailure {
        token,
        operation,
        surviving_role,
        surviving_transaction_id,
        ..
    } = err
    else {
        unreachable!()
    };
    assert_eq!(operation, TransferOperation::Create);
    assert_eq!(surviving_role, LegRole::Debit);
    assert!(ledger
        .get_transaction(&surviving_transaction_id)
        .await
        .unwrap()
        .is_some());

    // Retrying the delete cleans up the stray leg
    ledger.delete_transfer(&token).await.unwrap();
    assert_eq!(balance(&ledger, "a").await, dec("100"));
    assert!(ledger.verify_all_balances().await.unwrap().is_valid);
}

#[tokio::test]
async fn test_readers_never_see_one_transfer_leg() {
    let storage = SnapshotStorage::new();
    let ledger = Ledger::new(storage.clone());
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("150"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "B".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    storage.seen.lock().unwrap().clear();

    let transfer = ledger
        .create_transfer("a", "b", dec("40"), date(2024, 1, 1), "Move")
        .await
        .unwrap();
    let snapshot = ledger.delete_transfer(&transfer.token).await.unwrap();
    ledger.undo_delete_transfer(&snapshot).await.unwrap();

    let seen = storage.seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            (2, dec("110"), dec("40")),
            (0, dec("150"), dec("0")),
            (2, dec("110"), dec("40")),
        ]
    );
}

#[tokio::test]
async fn test_delete_then_undo_restores_balances() {
    let ledger = ledger_on(date(2024, 1, 31));
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("75.25"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "B".into(), AccountType::CreditCard, dec("-300"))
        .await
        .unwrap();
    let transfer = ledger
        .create_transfer("a", "b", dec("60.10"), date(2024, 1, 20), "Card payment")
        .await
        .unwrap();
    let a_before = balance(&ledger, "a").await;
    let b_before = balance(&ledger, "b").await;

    let snapshot = ledger.delete_transfer(&transfer.token).await.unwrap();
    assert!(matches!(
        ledger.get_transfer(&transfer.token).await,
        Err(LedgerError::TransferNotFound(_))
    ));
    let restored = ledger.undo_delete_transfer(&snapshot).await.unwrap();

    assert_eq!(balance(&ledger, "a").await, a_before);
    assert_eq!(balance(&ledger, "b").await, b_before);
    assert_eq!(restored.debit.date, transfer.debit.date);
    assert_eq!(restored.credit.description, "Card payment");
}

#[tokio::test]
async fn test_version_guard_on_update() {
    let ledger = ledger_on(date(2024, 1, 31));
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("0"))
        .await
        .unwrap();
    let entry = ledger
        .create_transaction(NewTransaction::expense("a", dec("10"), date(2024, 1, 5), "Taxi"))
        .await
        .unwrap();

    let updated = ledger
        .update_transaction(
            &entry.id,
            TransactionPatch::new()
                .amount(dec("12"))
                .expect_version(entry.version),
        )
        .await
        .unwrap();
    let stale = ledger
        .update_transaction(
            &entry.id,
            TransactionPatch::new()
                .amount(dec("15"))
                .expect_version(entry.version),
        )
        .await;
    assert!(matches!(stale, Err(LedgerError::ConcurrencyConflict(_))));
    assert_eq!(updated.version, entry.version + 1);
    assert_eq!(balance(&ledger, "a").await, dec("-12"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_lose_nothing() {
    let ledger = Arc::new(ledger_on(date(2024, 6, 30)));
    ledger
        .create_account("a".into(), "A".into(), AccountType::Bank, dec("1000"))
        .await
        .unwrap();
    ledger
        .create_account("b".into(), "B".into(), AccountType::Bank, dec("1000"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            ledger
                .create_transaction(NewTransaction::income(
                    "a",
                    BigDecimal::from(1),
                    date(2024, 6, 1),
                    format!("Tip {}", i),
                ))
                .await
                .map(|_| ())
        }));
    }
    for i in 0..20 {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        handles.push(tokio::spawn(async move {
            ledger
                .create_transfer(from, to, BigDecimal::from(10), date(2024, 6, 2), "Shuffle")
                .await
                .map(|_| ())
        }));
    }

    let all = join_all(handles);
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("writers deadlocked");

    assert_eq!(balance(&ledger, "a").await, dec("1050"));
    assert_eq!(balance(&ledger, "b").await, dec("1000"));
    let report = ledger.verify_all_balances().await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_deletes_and_moves_stay_consistent() {
    let ledger = Arc::new(ledger_on(date(2024, 6, 30)));
    for id in ["a", "b"] {
        ledger
            .create_account(id.into(), id.to_uppercase(), AccountType::Bank, dec("1000"))
            .await
            .unwrap();
    }
    let mut seeded = Vec::new();
    for i in 0..30 {
        let account = if i % 2 == 0 { "a" } else { "b" };
        let entry = ledger
            .create_transaction(NewTransaction::expense(
                account,
                BigDecimal::from(5),
                date(2024, 6, 1),
                format!("Seed {}", i),
            ))
            .await
            .unwrap();
        seeded.push(entry);
    }

    let mut handles = Vec::new();
    for (i, entry) in seeded.into_iter().enumerate() {
        let ledger = ledger.clone();
        handles.push(tokio::spawn(async move {
            match i % 3 {
                0 => ledger
                    .update_transaction(&entry.id, TransactionPatch::new().amount(BigDecimal::from(7)))
                    .await
                    .map(|_| ()),
                1 => ledger.delete_transaction(&entry.id).await.map(|_| ()),
                _ => {
                    let target = if entry.account_id == "a" { "b" } else { "a" };
                    ledger
                        .update_transaction(&entry.id, TransactionPatch::new().account(target))
                        .await
                        .map(|_| ())
                }
            }
        }));
    }
    for i in 0..30 {
        let ledger = ledger.clone();
        let account = if i % 2 == 0 { "b" } else { "a" };
        handles.push(tokio::spawn(async move {
            ledger
                .create_transaction(NewTransaction::income(
                    account,
                    BigDecimal::from(1),
                    date(2024, 6, 3),
                    format!("Refund {}", i),
                ))
                .await
                .map(|_| ())
        }));
    }
    for i in 0..20 {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        handles.push(tokio::spawn(async move {
            ledger
                .create_transfer(from, to, BigDecimal::from(10), date(2024, 6, 4), "Shuffle")
                .await
                .map(|_| ())
        }));
    }

    tokio::time::timeout(Duration::from_secs(30), join_all(handles))
        .await
        .expect("writers deadlocked");

    // 2000 opening, 30 seeds of -5, ten repriced to -7, ten deleted, 30 refunds of +1
    let total = balance(&ledger, "a").await + balance(&ledger, "b").await;
    assert_eq!(total, dec("1910"));
    let entries = ledger
        .list_transactions(&TransactionQuery::new())
        .await
        .unwrap();
    assert_eq!(entries.len(), 20 + 30 + 40);
    let report = ledger.verify_all_balances().await.unwrap();
    assert!(report.is_valid, "{:?}", report.issues);
}

#[tokio::test]
async fn test_entries_and_transfers_share_description_rules() {
    let ledger = ledger_on(date(2024, 1, 31));
    for id in ["a", "b"] {
        ledger
            .create_account(id.into(), id.to_uppercase(), AccountType::Bank, dec("100"))
            .await
            .unwrap();
    }
    let too_long = "x".repeat(501);

    let entry = ledger
        .create_transaction(NewTransaction::expense("a", dec("1"), date(2024, 1, 5), too_long.clone()))
        .await;
    assert!(matches!(entry, Err(LedgerError::Validation(_))));
    let transfer = ledger
        .create_transfer("a", "b", dec("1"), date(2024, 1, 5), &too_long)
        .await;
    assert!(matches!(transfer, Err(LedgerError::Validation(_))));
    let painted = ledger
        .create_transaction(
            NewTransaction::expense("a", dec("1"), date(2024, 1, 5), "Lunch").color("not-a-color"),
        )
        .await;
    assert!(matches!(painted, Err(LedgerError::Validation(_))));

    ledger
        .create_transaction(NewTransaction::expense("a", dec("1"), date(2024, 1, 5), "x".repeat(500)))
        .await
        .unwrap();
    assert_eq!(balance(&ledger, "a").await, dec("99"));
}

async fn join_all(handles: Vec<tokio::task::JoinHandle<LedgerResult<()>>>) {
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[derive(Debug, Clone)]
enum Op {
    Create {
        kind: TransactionKind,
        cents: u32,
        day: u32,
        held: bool,
    },
    Update {
        pick: usize,
        cents: u32,
        held: Option<bool>,
    },
    Delete {
        pick: usize,
    },
}

fn kind_strategy() -> impl Strategy<Value = TransactionKind> {
    prop_oneof![
        Just(TransactionKind::Income),
        Just(TransactionKind::Expense),
        Just(TransactionKind::Saving),
    ]
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (kind_strategy(), 1u32..100_000, 1u32..28, any::<bool>())
            .prop_map(|(kind, cents, day, held)| Op::Create { kind, cents, day, held }),
        1 => (any::<usize>(), 1u32..100_000, proptest::option::of(any::<bool>()))
            .prop_map(|(pick, cents, held)| Op::Update { pick, cents, held }),
        1 => any::<usize>().prop_map(|pick| Op::Delete { pick }),
    ]
}

fn cents(value: u32) -> BigDecimal {
    BigDecimal::new(value.into(), 2)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_balance_matches_ledger_after_any_sequence(ops in proptest::collection::vec(op_strategy(), 1..40)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let ledger = ledger_on(date(2024, 2, 14));
            ledger
                .create_account("p".into(), "Purse".into(), AccountType::Cash, cents(10_000))
                .await
                .unwrap();
            let mut live: Vec<String> = Vec::new();

            for op in ops {
                match op {
                    Op::Create { kind, cents: amount, day, held } => {
                        let mut input = NewTransaction::new("p", kind, cents(amount), date(2024, 2, day), "Entry");
                        if held {
                            input = input.applied(false);
                        }
                        live.push(ledger.create_transaction(input).await.unwrap().id);
                    }
                    Op::Update { pick, cents: amount, held } if !live.is_empty() => {
                        let id = &live[pick % live.len()];
                        let mut patch = TransactionPatch::new().amount(cents(amount));
                        if let Some(held) = held {
                            patch = patch.applied(Some(!held));
                        }
                        ledger.update_transaction(id, patch).await.unwrap();
                    }
                    Op::Delete { pick } if !live.is_empty() => {
                        let id = live.remove(pick % live.len());
                        ledger.delete_transaction(&id).await.unwrap();
                    }
                    _ => {}
                }
            }

            let entries = ledger.list_transactions(&TransactionQuery::new()).await.unwrap();
            let expected: BigDecimal = cents(10_000)
                + entries.iter().map(|e| e.balance_delta()).sum::<BigDecimal>();
            assert_eq!(entries.len(), live.len());
            assert_eq!(balance(&ledger, "p").await, expected);
            assert!(ledger.verify_balance("p").await.unwrap().is_consistent());
        });
    }
}
