//! Holder resolution against the holder directory
//!
//! Holders are never created or destroyed here; this service only
//! resolves opaque (type, id) pairs into concrete records and validates
//! their capability flags.

use sqlx::PgPool;
use uuid::Uuid;

use shared::{ConsumableItem, HolderContext, HolderRef, HolderType};

use crate::error::{AppError, AppResult};

/// Resolver for the four holder kinds
#[derive(Clone)]
pub struct HolderService {
    db: PgPool,
}

impl HolderService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Resolve a holder reference to its directory record
    ///
    /// Employees and sub-locations also resolve their owning office so
    /// location-scoped checks can run without a second lookup.
    pub async fn resolve(&self, holder: HolderRef) -> AppResult<HolderContext> {
        match holder.kind {
            HolderType::CentralStore => {
                let row = sqlx::query_as::<_, (Uuid, String)>(
                    "SELECT id, name FROM central_stores WHERE id = $1",
                )
                .bind(holder.id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| not_found(holder))?;

                Ok(HolderContext {
                    holder_type: HolderType::CentralStore,
                    holder_id: row.0,
                    display_name: row.1,
                    office_id: None,
                    chemical_capable: true,
                })
            }
            HolderType::Office => {
                let row = sqlx::query_as::<_, (Uuid, String, bool)>(
                    "SELECT id, name, chemical_capable FROM offices WHERE id = $1",
                )
                .bind(holder.id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| not_found(holder))?;

                Ok(HolderContext {
                    holder_type: HolderType::Office,
                    holder_id: row.0,
                    display_name: row.1,
                    office_id: Some(row.0),
                    chemical_capable: row.2,
                })
            }
            HolderType::SubLocation => {
                let row = sqlx::query_as::<_, (Uuid, String, Uuid, bool)>(
                    r#"
                    SELECT s.id, s.name, s.office_id, o.chemical_capable
                    FROM sub_locations s
                    JOIN offices o ON o.id = s.office_id
                    WHERE s.id = $1
                    "#,
                )
                .bind(holder.id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| not_found(holder))?;

                Ok(HolderContext {
                    holder_type: HolderType::SubLocation,
                    holder_id: row.0,
                    display_name: row.1,
                    office_id: Some(row.2),
                    chemical_capable: row.3,
                })
            }
            HolderType::Employee => {
                let row = sqlx::query_as::<_, (Uuid, String, Uuid, bool)>(
                    r#"
                    SELECT e.id, e.display_name, e.office_id, o.chemical_capable
                    FROM employees e
                    JOIN offices o ON o.id = e.office_id
                    WHERE e.id = $1
                    "#,
                )
                .bind(holder.id)
                .fetch_optional(&self.db)
                .await?
                .ok_or_else(|| not_found(holder))?;

                Ok(HolderContext {
                    holder_type: HolderType::Employee,
                    holder_id: row.0,
                    display_name: row.1,
                    office_id: Some(row.2),
                    chemical_capable: row.3,
                })
            }
        }
    }

    /// The single system-wide central store
    pub async fn central_store(&self) -> AppResult<HolderContext> {
        let row = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, name FROM central_stores ORDER BY created_at LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::Internal("No central store configured".to_string()))?;

        Ok(HolderContext {
            holder_type: HolderType::CentralStore,
            holder_id: row.0,
            display_name: row.1,
            office_id: None,
            chemical_capable: true,
        })
    }

    /// Chemicals may only sit at the central store or at an office with
    /// the chemical-handling flag set.
    pub fn ensure_chemical_capable(
        &self,
        item: &ConsumableItem,
        holder: &HolderContext,
    ) -> AppResult<()> {
        if !item.is_chemical || holder.is_central_store() {
            return Ok(());
        }
        if !holder.chemical_capable {
            return Err(AppError::CapabilityDenied(format!(
                "holder {} is not approved for chemical storage",
                holder.display_name
            )));
        }
        Ok(())
    }
}

fn not_found(holder: HolderRef) -> AppError {
    AppError::HolderNotFound(format!("{} {}", holder.kind.as_str(), holder.id))
}
