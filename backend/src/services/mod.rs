pub mod allocation;
pub mod audit;
pub mod catalog;
pub mod holder;
pub mod inventory;
pub mod lot;
pub mod reports;
pub mod units;

pub use allocation::{lot_free_allocation, pick_lots, LotAvailability};
pub use audit::{AuditEvent, AuditService};
pub use catalog::CatalogService;
pub use holder::HolderService;
pub use inventory::InventoryService;
pub use lot::LotService;
pub use reports::ReportService;
pub use units::{UnitService, UnitTable};
