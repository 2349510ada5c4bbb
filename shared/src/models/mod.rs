//! Domain models for the stock ledger

mod ledger;
mod project;
mod stock;

pub use ledger::*;
pub use project::*;
pub use stock::*;
