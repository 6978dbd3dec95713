//! Utility modules

pub mod locks;
pub mod memory_storage;
pub mod validation;

pub use locks::*;
pub use memory_storage::*;
pub use validation::*;
