//! Shared types and models for the WeldAdmin stock ledger
//!
//! This crate holds the pure part of the system: domain records, the balance
//! calculator, ledger replay and item-code proposals. It does no I/O.

pub mod balance;
pub mod codes;
pub mod models;
pub mod types;
pub mod validation;

pub use balance::*;
pub use codes::*;
pub use models::*;
pub use types::*;
pub use validation::*;
