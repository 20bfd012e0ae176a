pub mod health;
pub mod inventory;
pub mod reports;
pub mod units;

pub use health::health_check;
pub use inventory::{adjust, consume, dispose, opening_balance, receive, return_stock, transfer};
pub use reports::{expiring_lots, holder_balances, item_balance, ledger, rollup};
pub use units::{create_unit, list_units, update_unit};
