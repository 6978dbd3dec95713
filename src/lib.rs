//! # Finance Ledger
//!
//! Consistency core for a personal-finance tracker: accounts with stored
//! balances, income/expense/saving entries, two-leg transfers, and recurring
//! rules that materialize into entries on demand.
//!
//! ## Features
//!
//! - **Balance bookkeeping**: every create, update and delete adjusts the
//!   owning account's balance in the same atomic commit
//! - **Transfers**: debit and credit legs linked by a correlation token, with
//!   compensation and explicit partial-failure reporting
//! - **Recurring rules**: daily, weekly and monthly cadences with per-occurrence
//!   skip and postpone, applied at most once per occurrence
//! - **Pending classification**: one canonical clock decides what is applied
//! - **Storage abstraction**: async [`LedgerStorage`] trait with an in-memory
//!   implementation
//!
//! ## Quick Start
//!
//! ```rust
//! use finance_ledger::{AccountType, Ledger, MemoryStorage, NewTransaction};
//! use bigdecimal::BigDecimal;
//! use chrono::NaiveDate;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), finance_ledger::LedgerError> {
//! let ledger = Ledger::new(MemoryStorage::new());
//! ledger
//!     .create_account("bank".into(), "Bank".into(), AccountType::Bank, BigDecimal::from(100))
//!     .await?;
//!
//! let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
//! ledger
//!     .create_transaction(NewTransaction::income("bank", BigDecimal::from(50), date, "Salary"))
//!     .await?;
//!
//! let bank = ledger.get_account("bank").await?.unwrap();
//! assert_eq!(bank.current_balance, BigDecimal::from(150));
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod ledger;
pub mod logging;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use clock::{CanonicalClock, FixedClock, ReferenceClock};
pub use config::LedgerConfig;
pub use ledger::*;
pub use logging::init_tracing;
pub use traits::*;
pub use types::*;
pub use utils::locks::{AccountGuard, AccountLocks};
pub use utils::memory_storage::MemoryStorage;
