//! Caller capability set
//!
//! The engine never interprets role names; the authorization layer
//! precomputes these flags per caller and the engine only consults them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated caller as the engine sees it: an identity plus the
/// precomputed capability flags, nothing role-shaped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    pub actor_id: Uuid,
    /// The caller's own employee holder, when they have one
    pub employee_holder_id: Option<Uuid>,
    /// The office the caller belongs to, for location-scoped reads
    pub office_id: Option<Uuid>,
    pub capabilities: InventoryCapabilities,
}

/// Boolean capability flags for inventory operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCapabilities {
    pub receive: bool,
    pub transfer_central: bool,
    pub transfer_lab: bool,
    pub consume: bool,
    pub adjust: bool,
    pub dispose: bool,
    pub return_stock: bool,
    pub opening_balance: bool,
    pub view_reports: bool,
    pub override_negative: bool,
}

impl InventoryCapabilities {
    /// Build from `resource:action` permission strings
    pub fn from_permissions(permissions: &[String]) -> Self {
        let has = |action: &str| {
            permissions
                .iter()
                .any(|p| p == &format!("inventory:{}", action))
        };
        Self {
            receive: has("receive"),
            transfer_central: has("transfer_central"),
            transfer_lab: has("transfer_lab"),
            consume: has("consume"),
            adjust: has("adjust"),
            dispose: has("dispose"),
            return_stock: has("return"),
            opening_balance: has("opening_balance"),
            view_reports: has("view_reports"),
            override_negative: has("override_negative"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_permissions() {
        let perms = vec![
            "inventory:receive".to_string(),
            "inventory:consume".to_string(),
            "inventory:view_reports".to_string(),
        ];
        let caps = InventoryCapabilities::from_permissions(&perms);
        assert!(caps.receive);
        assert!(caps.consume);
        assert!(caps.view_reports);
        assert!(!caps.transfer_central);
        assert!(!caps.override_negative);
    }

    #[test]
    fn test_unrelated_permissions_ignored() {
        let perms = vec!["catalog:receive".to_string(), "receive".to_string()];
        let caps = InventoryCapabilities::from_permissions(&perms);
        assert_eq!(caps, InventoryCapabilities::default());
    }
}
