//! Resolved holder context

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::HolderType;

/// A holder reference resolved against the holder directory
///
/// Employees and sub-locations carry their owning office so access and
/// chemical-capability checks can be scoped to a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HolderContext {
    pub holder_type: HolderType,
    pub holder_id: Uuid,
    pub display_name: String,
    pub office_id: Option<Uuid>,
    pub chemical_capable: bool,
}

impl HolderContext {
    pub fn is_central_store(&self) -> bool {
        self.holder_type == HolderType::CentralStore
    }

    /// The office used for location-scoped checks; offices scope to
    /// themselves, the central store to none.
    pub fn scope_office_id(&self) -> Option<Uuid> {
        match self.holder_type {
            HolderType::Office => Some(self.holder_id),
            HolderType::CentralStore => None,
            _ => self.office_id,
        }
    }
}
