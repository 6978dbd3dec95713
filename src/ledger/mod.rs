//! Ledger module containing account management, transaction processing,
//! transfers, recurring rules and pending-state classification

pub mod account;
pub mod classifier;
pub mod core;
pub mod recurring;
pub mod transaction;
pub mod transfer;

pub use self::core::*;
pub use account::*;
pub use classifier::*;
pub use recurring::*;
pub use transaction::*;
pub use transfer::*;
