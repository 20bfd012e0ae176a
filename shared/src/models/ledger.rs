//! The immutable inventory ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{HolderRef, HolderType};

/// Kinds of inventory movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Receipt,
    Transfer,
    Consume,
    Adjust,
    Dispose,
    Return,
    OpeningBalance,
}

impl LedgerEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerEntryType::Receipt => "receipt",
            LedgerEntryType::Transfer => "transfer",
            LedgerEntryType::Consume => "consume",
            LedgerEntryType::Adjust => "adjust",
            LedgerEntryType::Dispose => "dispose",
            LedgerEntryType::Return => "return",
            LedgerEntryType::OpeningBalance => "opening_balance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(LedgerEntryType::Receipt),
            "transfer" => Some(LedgerEntryType::Transfer),
            "consume" => Some(LedgerEntryType::Consume),
            "adjust" => Some(LedgerEntryType::Adjust),
            "dispose" => Some(LedgerEntryType::Dispose),
            "return" => Some(LedgerEntryType::Return),
            "opening_balance" => Some(LedgerEntryType::OpeningBalance),
            _ => None,
        }
    }
}

/// One immutable ledger entry
///
/// The ledger is the system of record; balances are the derived view.
/// Entries are appended inside the same transaction that mutates the
/// balance and are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub entry_type: LedgerEntryType,
    pub timestamp: DateTime<Utc>,
    pub actor_id: Uuid,
    pub from_holder: Option<HolderRef>,
    pub to_holder: Option<HolderRef>,
    pub consumable_item_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub container_id: Option<Uuid>,
    pub quantity_base: Decimal,
    pub entered_quantity: Decimal,
    pub entered_unit: String,
    pub reason_code_id: Option<Uuid>,
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub metadata: serde_json::Value,
}

/// One allocation leg: a lot and the base quantity drawn from it
///
/// Both the explicit caller-specified path and FEFO selection produce
/// this shape, so balance mutation and ledger appends never need to know
/// which one ran. `lot_id = None` is the synthetic allocation for
/// lot-free items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub lot_id: Option<Uuid>,
    pub quantity_base: Decimal,
}

/// Filter for ledger queries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub item_id: Option<Uuid>,
    pub lot_id: Option<Uuid>,
    pub entry_type: Option<LedgerEntryType>,
    pub holder_type: Option<HolderType>,
    pub holder_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
