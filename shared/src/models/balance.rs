//! Materialized on-hand balances

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::HolderType;

/// Materialized on-hand quantity for a (holder, item, lot) triple
///
/// `lot_id = None` is the lot-free aggregate used for items without lot
/// tracking. Rows are created lazily on first movement and zeroed rather
/// than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub holder_type: HolderType,
    pub holder_id: Uuid,
    pub consumable_item_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub quantity_on_hand_base: Decimal,
    pub quantity_reserved_base: Decimal,
}

impl Balance {
    pub fn available(&self) -> Decimal {
        self.quantity_on_hand_base - self.quantity_reserved_base
    }
}

/// Holder-and-item aggregate summed across lots, for the single-number
/// balance listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSummary {
    pub holder_type: HolderType,
    pub holder_id: Uuid,
    pub consumable_item_id: Uuid,
    pub item_name: String,
    pub base_unit: String,
    pub quantity_on_hand_base: Decimal,
    pub lot_count: i64,
}
