//! Domain models for the Lab Consumables Management Platform

mod balance;
mod capability;
mod holder;
mod item;
mod ledger;
mod lot;
mod unit;

pub use balance::*;
pub use capability::*;
pub use holder::*;
pub use item::*;
pub use ledger::*;
pub use lot::*;
pub use unit::*;
