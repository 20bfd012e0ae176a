//! Read-only catalog lookups: consumable items and reason codes
//!
//! Item attributes are maintained by catalog management elsewhere; this
//! engine only reads them.

use sqlx::PgPool;
use uuid::Uuid;

use shared::{ConsumableItem, ReasonCategory, ReasonCode, UnitGroup};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Look up a consumable item by id
    pub async fn get_item(&self, item_id: Uuid) -> AppResult<ConsumableItem> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String, bool, bool, bool, bool)>(
            r#"
            SELECT id, name, base_unit, unit_group, is_chemical, is_controlled,
                   requires_lot_tracking, requires_container_tracking
            FROM consumable_items
            WHERE id = $1
            "#,
        )
        .bind(item_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Consumable item".to_string()))?;

        let unit_group = UnitGroup::from_str(&row.3)
            .ok_or_else(|| AppError::Internal(format!("Unknown unit group: {}", row.3)))?;

        Ok(ConsumableItem {
            id: row.0,
            name: row.1,
            base_unit: row.2,
            unit_group,
            is_chemical: row.4,
            is_controlled: row.5,
            requires_lot_tracking: row.6,
            requires_container_tracking: row.7,
        })
    }

    /// Look up a reason code and require it to be active and of the
    /// expected category
    pub async fn get_reason_code(
        &self,
        reason_code_id: Uuid,
        expected: ReasonCategory,
    ) -> AppResult<ReasonCode> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String, bool)>(
            r#"
            SELECT id, code, description, category, is_active
            FROM reason_codes
            WHERE id = $1
            "#,
        )
        .bind(reason_code_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Reason code".to_string()))?;

        let category = ReasonCategory::from_str(&row.3)
            .ok_or_else(|| AppError::Internal(format!("Unknown reason category: {}", row.3)))?;

        if !row.4 {
            return Err(AppError::NotFound("Reason code".to_string()));
        }
        if category != expected {
            return Err(AppError::ReasonCodeCategoryMismatch {
                expected: expected.as_str().to_string(),
            });
        }

        Ok(ReasonCode {
            id: row.0,
            code: row.1,
            description: row.2,
            category,
            is_active: row.4,
        })
    }
}
