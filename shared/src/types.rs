//! Common types used across the platform

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kinds of entities that can hold on-hand inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HolderType {
    CentralStore,
    Office,
    SubLocation,
    Employee,
}

impl HolderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolderType::CentralStore => "central_store",
            HolderType::Office => "office",
            HolderType::SubLocation => "sub_location",
            HolderType::Employee => "employee",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "central_store" => Some(HolderType::CentralStore),
            "office" => Some(HolderType::Office),
            "sub_location" => Some(HolderType::SubLocation),
            "employee" => Some(HolderType::Employee),
            _ => None,
        }
    }
}

/// Polymorphic reference to an inventory holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderRef {
    #[serde(rename = "holder_type")]
    pub kind: HolderType,
    #[serde(rename = "holder_id")]
    pub id: Uuid,
}

impl HolderRef {
    pub fn new(kind: HolderType, id: Uuid) -> Self {
        Self { kind, id }
    }

    pub fn central_store(id: Uuid) -> Self {
        Self::new(HolderType::CentralStore, id)
    }

    pub fn office(id: Uuid) -> Self {
        Self::new(HolderType::Office, id)
    }

    pub fn employee(id: Uuid) -> Self {
        Self::new(HolderType::Employee, id)
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 50,
        }
    }
}

impl Pagination {
    pub fn offset(&self) -> i64 {
        (self.page.saturating_sub(1) as i64) * self.per_page as i64
    }

    pub fn limit(&self) -> i64 {
        self.per_page as i64
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u32,
    pub per_page: u32,
    pub total_items: u64,
    pub total_pages: u32,
}

impl PaginationMeta {
    pub fn new(pagination: &Pagination, total_items: u64) -> Self {
        let total_pages = if pagination.per_page == 0 {
            0
        } else {
            ((total_items + pagination.per_page as u64 - 1) / pagination.per_page as u64) as u32
        };
        Self {
            page: pagination.page,
            per_page: pagination.per_page,
            total_items,
            total_pages,
        }
    }
}
