//! WeldAdmin stock ledger and project cost allocation engine
//!
//! Tracks stock quantities through an append-only ledger and couples issues,
//! returns and allocations to project cost rollups as atomic units.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod services;
pub mod store;

pub use config::Config;
pub use engine::StockEngine;
pub use error::{AppError, AppResult};
pub use store::{MemoryStore, PgStore, StockStore};
