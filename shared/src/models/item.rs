//! Consumable item catalog and reason codes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UnitGroup;

/// A consumable item from the catalog (read-only to this engine)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumableItem {
    pub id: Uuid,
    pub name: String,
    /// Canonical unit code all balances and ledger quantities use
    pub base_unit: String,
    pub unit_group: UnitGroup,
    pub is_chemical: bool,
    pub is_controlled: bool,
    pub requires_lot_tracking: bool,
    pub requires_container_tracking: bool,
}

impl ConsumableItem {
    /// Controlled items are always container-tracked
    pub fn needs_container_tracking(&self) -> bool {
        self.requires_container_tracking || self.is_controlled
    }
}

/// Category a reason code applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCategory {
    Adjust,
    Dispose,
}

impl ReasonCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCategory::Adjust => "adjust",
            ReasonCategory::Dispose => "dispose",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "adjust" => Some(ReasonCategory::Adjust),
            "dispose" => Some(ReasonCategory::Dispose),
            _ => None,
        }
    }
}

/// A reason code for adjustments and disposals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonCode {
    pub id: Uuid,
    pub code: String,
    pub description: String,
    pub category: ReasonCategory,
    pub is_active: bool,
}
