//! Basic ledger usage example

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use finance_ledger::{
    init_tracing, AccountType, Frequency, Ledger, LedgerConfig, MemoryStorage, NewRecurringRule,
    NewTransaction, TransactionKind,
};
use std::str::FromStr;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = LedgerConfig::load("finance-ledger.json")?.with_env_overrides()?;
    init_tracing(&config.log_filter);

    println!("💶 Finance Ledger - Basic Example\n");
    let ledger = Ledger::with_config(MemoryStorage::new(), &config)?;
    let today = ledger.today();

    // 1. Accounts
    println!("📒 Opening accounts...");
    for (id, name, account_type, opening) in [
        ("checking", "Checking", AccountType::Bank, "1200.00"),
        ("wallet", "Wallet", AccountType::Cash, "40.00"),
        ("savings", "Rainy day", AccountType::Savings, "0"),
    ] {
        let account = ledger
            .create_account(
                id.to_string(),
                name.to_string(),
                account_type,
                BigDecimal::from_str(opening)?,
            )
            .await?;
        println!(
            "  ✓ {} - {} ({:?}) opening {}",
            account.id, account.name, account.account_type, account.current_balance
        );
    }
    println!();

    // 2. Day-to-day entries
    println!("🧾 Recording entries...");
    ledger
        .create_transaction(
            NewTransaction::income("checking", BigDecimal::from(2500), today, "Salary")
                .category("salary")
                .color("#2e7d32"),
        )
        .await?;
    let groceries = ledger
        .create_transaction(NewTransaction::expense(
            "wallet",
            BigDecimal::from_str("32.80")?,
            today,
            "Groceries",
        ))
        .await?;
    println!("  ✓ groceries on {}: {}", groceries.date, groceries.amount);
    println!();

    // 3. Transfers
    println!("🔁 Moving money...");
    let transfer = ledger
        .create_transfer("checking", "savings", BigDecimal::from(300), today, "Monthly saving")
        .await?;
    println!(
        "  ✓ transfer {} : {} → {} ({})",
        transfer.token,
        transfer.origin_account_id(),
        transfer.destination_account_id(),
        transfer.amount()
    );
    println!();

    // 4. Recurring rules
    println!("📅 Scheduling rent...");
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).ok_or("bad start date")?;
    let rent = ledger
        .create_recurring_rule(NewRecurringRule::new(
            "checking",
            TransactionKind::Expense,
            BigDecimal::from(950),
            "Rent",
            Frequency::Monthly,
            start,
        ))
        .await?;
    let horizon = today + chrono::Days::new(62);
    for occurrence in ledger.recurring_occurrences(&rent.id, today, horizon).await? {
        println!("  • rent due {}", occurrence.effective_date);
    }
    let applied = ledger.apply_due_recurring().await?;
    println!("  ✓ applied {} past occurrences", applied.len());
    println!();

    // 5. Views
    println!("📊 Summary as of {}", today);
    for account in ledger.list_accounts().await? {
        let summary = ledger.account_summary(&account.id).await?;
        println!(
            "  {:<10} balance {:>10}  income {:>8}  expenses {:>8}  transfers {:>8}",
            account.id,
            summary.current_balance,
            summary.applied_income,
            summary.applied_expenses,
            summary.net_transfers
        );
    }
    let projected = ledger.projected_balance("checking", horizon).await?;
    println!("  checking projected on {}: {}", horizon, projected);

    let report = ledger.verify_all_balances().await?;
    println!(
        "\n🔍 Integrity: {}",
        if report.is_valid { "ok" } else { "problems found" }
    );
    for issue in &report.issues {
        println!("  ! {}", issue);
    }

    Ok(())
}
