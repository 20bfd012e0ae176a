//! Shared types and models for the Lab Consumables Management Platform
//!
//! This crate contains the domain types shared between the backend and
//! other components of the system: holder references, unit definitions,
//! lots, containers, balances and ledger entries.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
