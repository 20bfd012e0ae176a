//! Lots and individually tracked containers

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::HolderType;

/// An expiry-dated batch of a consumable item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub consumable_item_id: Uuid,
    /// Holder the lot was introduced at
    pub holder_type: HolderType,
    pub holder_id: Uuid,
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub quantity_received_base: Decimal,
    /// Total on hand across all holders, maintained alongside every
    /// lot-keyed balance change
    pub quantity_available_base: Decimal,
    pub received_at: DateTime<Utc>,
}

/// Lifecycle of a tracked container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    InStock,
    Empty,
    Disposed,
    Lost,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::InStock => "in_stock",
            ContainerStatus::Empty => "empty",
            ContainerStatus::Disposed => "disposed",
            ContainerStatus::Lost => "lost",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(ContainerStatus::InStock),
            "empty" => Some(ContainerStatus::Empty),
            "disposed" => Some(ContainerStatus::Disposed),
            "lost" => Some(ContainerStatus::Lost),
            _ => None,
        }
    }

    /// Disposed is terminal; lost containers may be found again
    pub fn can_transition_to(&self, next: ContainerStatus) -> bool {
        match (self, next) {
            (ContainerStatus::InStock, ContainerStatus::Empty) => true,
            (ContainerStatus::InStock, ContainerStatus::Disposed) => true,
            (ContainerStatus::InStock, ContainerStatus::Lost) => true,
            (ContainerStatus::Empty, ContainerStatus::Disposed) => true,
            (ContainerStatus::Lost, ContainerStatus::InStock) => true,
            _ => false,
        }
    }
}

/// A physical container drawn from a lot
///
/// Used only for items flagged as container-tracked or controlled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: Uuid,
    pub lot_id: Uuid,
    /// Globally unique label printed on the container
    pub container_code: String,
    pub initial_quantity_base: Decimal,
    pub current_quantity_base: Decimal,
    pub current_holder_type: HolderType,
    pub current_holder_id: Uuid,
    pub status: ContainerStatus,
}
