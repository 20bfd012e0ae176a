//! Lot and container registry
//!
//! Lots are created on first receipt of a lot-tracked item and are
//! immutable afterwards except for the running quantity-available
//! bookkeeping. Containers are individually tracked physical units drawn
//! from a lot, used for controlled or container-tracked items.
//!
//! Mutating methods take a `PgConnection` so they run inside the
//! facade's transaction; nothing here commits on its own.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use shared::{
    container_move_tolerance, quantities_equal, quantity_epsilon, round_quantity,
    validate_batch_number, Container, ContainerStatus, HolderContext, HolderType, Lot,
};

use crate::error::{AppError, AppResult};

#[derive(Clone)]
pub struct LotService {
    db: PgPool,
}

/// One container carved out of a received lot
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerSplitInput {
    pub container_code: String,
    pub quantity: Decimal,
}

/// Parse a caller-supplied expiry date (ISO `YYYY-MM-DD`)
pub fn parse_expiry(input: &str) -> AppResult<NaiveDate> {
    input
        .trim()
        .parse::<NaiveDate>()
        .map_err(|_| AppError::InvalidExpiry(input.trim().to_string()))
}

/// Whole-quantity rule for container moves: the requested quantity must
/// equal the container's current quantity within 1e-4.
pub fn ensure_whole_container_move(current: Decimal, requested: Decimal) -> AppResult<()> {
    if !quantities_equal(current, requested, container_move_tolerance()) {
        return Err(AppError::PartialContainerMoveNotAllowed);
    }
    Ok(())
}

impl LotService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a lot at the given holder
    ///
    /// Quantities are rounded to 2 decimal places, the same rule applied
    /// to every quantity in the system.
    pub async fn create_lot(
        &self,
        conn: &mut PgConnection,
        item_id: Uuid,
        holder: &HolderContext,
        batch_number: &str,
        expiry_date: NaiveDate,
        quantity_received_base: Decimal,
    ) -> AppResult<Lot> {
        validate_batch_number(batch_number).map_err(|msg| AppError::Validation {
            field: "batch_number".to_string(),
            message: msg.to_string(),
        })?;

        let quantity = round_quantity(quantity_received_base);

        let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO lots (consumable_item_id, holder_type, holder_id, batch_number,
                              expiry_date, quantity_received_base, quantity_available_base)
            VALUES ($1, $2, $3, $4, $5, $6, 0)
            RETURNING id, received_at
            "#,
        )
        .bind(item_id)
        .bind(holder.holder_type.as_str())
        .bind(holder.holder_id)
        .bind(batch_number.trim())
        .bind(expiry_date)
        .bind(quantity)
        .fetch_one(&mut *conn)
        .await?;

        Ok(Lot {
            id: row.0,
            consumable_item_id: item_id,
            holder_type: holder.holder_type,
            holder_id: holder.holder_id,
            batch_number: batch_number.trim().to_string(),
            expiry_date: Some(expiry_date),
            quantity_received_base: quantity,
            // filled in by the balance delta inside the same transaction
            quantity_available_base: Decimal::ZERO,
            received_at: row.1,
        })
    }

    /// Fetch a lot inside the current transaction
    pub async fn get_lot(&self, conn: &mut PgConnection, lot_id: Uuid) -> AppResult<Lot> {
        let row = sqlx::query_as::<
            _,
            (
                Uuid,
                Uuid,
                String,
                Uuid,
                String,
                Option<NaiveDate>,
                Decimal,
                Decimal,
                DateTime<Utc>,
            ),
        >(
            r#"
            SELECT id, consumable_item_id, holder_type, holder_id, batch_number,
                   expiry_date, quantity_received_base, quantity_available_base, received_at
            FROM lots
            WHERE id = $1
            "#,
        )
        .bind(lot_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Lot".to_string()))?;

        let holder_type = HolderType::from_str(&row.2)
            .ok_or_else(|| AppError::Internal(format!("Unknown holder type: {}", row.2)))?;

        Ok(Lot {
            id: row.0,
            consumable_item_id: row.1,
            holder_type,
            holder_id: row.3,
            batch_number: row.4,
            expiry_date: row.5,
            quantity_received_base: row.6,
            quantity_available_base: row.7,
            received_at: row.8,
        })
    }

    /// Referential-integrity guard between a lot and an item
    pub fn ensure_lot_belongs_to_item(&self, lot: &Lot, item_id: Uuid) -> AppResult<()> {
        if lot.consumable_item_id != item_id {
            return Err(AppError::MismatchedLot);
        }
        Ok(())
    }

    /// Fetch a container and the item its lot belongs to
    pub async fn get_container(
        &self,
        conn: &mut PgConnection,
        container_id: Uuid,
    ) -> AppResult<(Container, Uuid)> {
        let row = sqlx::query_as::<
            _,
            (Uuid, Uuid, String, Decimal, Decimal, String, Uuid, String, Uuid),
        >(
            r#"
            SELECT c.id, c.lot_id, c.container_code, c.initial_quantity_base,
                   c.current_quantity_base, c.current_holder_type, c.current_holder_id,
                   c.status, l.consumable_item_id
            FROM containers c
            JOIN lots l ON l.id = c.lot_id
            WHERE c.id = $1
            "#,
        )
        .bind(container_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::NotFound("Container".to_string()))?;

        let holder_type = HolderType::from_str(&row.5)
            .ok_or_else(|| AppError::Internal(format!("Unknown holder type: {}", row.5)))?;
        let status = ContainerStatus::from_str(&row.7)
            .ok_or_else(|| AppError::Internal(format!("Unknown container status: {}", row.7)))?;

        Ok((
            Container {
                id: row.0,
                lot_id: row.1,
                container_code: row.2,
                initial_quantity_base: row.3,
                current_quantity_base: row.4,
                current_holder_type: holder_type,
                current_holder_id: row.6,
                status,
            },
            row.8,
        ))
    }

    /// Referential-integrity guard between a container and an item
    pub fn ensure_container_belongs_to_item(
        &self,
        container_item_id: Uuid,
        item_id: Uuid,
    ) -> AppResult<()> {
        if container_item_id != item_id {
            return Err(AppError::MismatchedContainer);
        }
        Ok(())
    }

    /// Split a received lot into containers
    ///
    /// Sub-quantities must sum to the received total within 1e-4.
    pub async fn create_containers(
        &self,
        conn: &mut PgConnection,
        lot: &Lot,
        holder: &HolderContext,
        total_base: Decimal,
        splits: &[ContainerSplitInput],
    ) -> AppResult<Vec<Container>> {
        let parts: Vec<Decimal> = splits.iter().map(|s| s.quantity).collect();
        shared::validate_container_split(total_base, &parts)
            .map_err(|_| AppError::ContainerSumMismatch)?;

        let mut containers = Vec::with_capacity(splits.len());
        for split in splits {
            let code = split.container_code.trim();
            if code.is_empty() {
                return Err(AppError::Validation {
                    field: "container_code".to_string(),
                    message: "Container code cannot be empty".to_string(),
                });
            }

            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM containers WHERE container_code = $1)",
            )
            .bind(code)
            .fetch_one(&mut *conn)
            .await?;
            if exists {
                return Err(AppError::DuplicateEntry(format!("container {}", code)));
            }

            let quantity = round_quantity(split.quantity);
            let id = sqlx::query_scalar::<_, Uuid>(
                r#"
                INSERT INTO containers (lot_id, container_code, initial_quantity_base,
                                        current_quantity_base, current_holder_type,
                                        current_holder_id, status)
                VALUES ($1, $2, $3, $3, $4, $5, 'in_stock')
                RETURNING id
                "#,
            )
            .bind(lot.id)
            .bind(code)
            .bind(quantity)
            .bind(holder.holder_type.as_str())
            .bind(holder.holder_id)
            .fetch_one(&mut *conn)
            .await?;

            containers.push(Container {
                id,
                lot_id: lot.id,
                container_code: code.to_string(),
                initial_quantity_base: quantity,
                current_quantity_base: quantity,
                current_holder_type: holder.holder_type,
                current_holder_id: holder.holder_id,
                status: ContainerStatus::InStock,
            });
        }

        Ok(containers)
    }

    /// Move a container to a new holder (whole-quantity moves only; the
    /// caller has already checked the quantity)
    pub async fn move_container(
        &self,
        conn: &mut PgConnection,
        container_id: Uuid,
        destination: &HolderContext,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE containers
            SET current_holder_type = $1, current_holder_id = $2
            WHERE id = $3
            "#,
        )
        .bind(destination.holder_type.as_str())
        .bind(destination.holder_id)
        .bind(container_id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Decrement a container's quantity; flips to the given terminal
    /// status when it reaches zero
    pub async fn drain_container(
        &self,
        conn: &mut PgConnection,
        container: &Container,
        quantity_base: Decimal,
        at_zero: ContainerStatus,
    ) -> AppResult<()> {
        if container.status != ContainerStatus::InStock {
            return Err(AppError::ContainerNotAtSource);
        }
        if quantity_base > container.current_quantity_base + quantity_epsilon() {
            return Err(AppError::InsufficientStock(format!(
                "container {} holds {}",
                container.container_code, container.current_quantity_base
            )));
        }

        let remaining = round_quantity(container.current_quantity_base - quantity_base);
        let reaches_zero = quantities_equal(remaining, Decimal::ZERO, quantity_epsilon());
        let new_status = if reaches_zero {
            if !container.status.can_transition_to(at_zero) {
                return Err(AppError::Internal(format!(
                    "invalid container transition {} -> {}",
                    container.status.as_str(),
                    at_zero.as_str()
                )));
            }
            at_zero
        } else {
            container.status
        };

        sqlx::query(
            r#"
            UPDATE containers
            SET current_quantity_base = $1, status = $2
            WHERE id = $3
            "#,
        )
        .bind(if reaches_zero { Decimal::ZERO } else { remaining })
        .bind(new_status.as_str())
        .bind(container.id)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_expiry_valid() {
        assert_eq!(
            parse_expiry("2026-03-15").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
        );
        assert_eq!(
            parse_expiry(" 2026-03-15 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
        );
    }

    #[test]
    fn test_parse_expiry_invalid() {
        assert!(matches!(
            parse_expiry("15/03/2026"),
            Err(AppError::InvalidExpiry(_))
        ));
        assert!(matches!(
            parse_expiry("2026-13-40"),
            Err(AppError::InvalidExpiry(_))
        ));
        assert!(matches!(parse_expiry(""), Err(AppError::InvalidExpiry(_))));
    }

    #[test]
    fn test_whole_container_move_exact() {
        assert!(ensure_whole_container_move(dec("250"), dec("250")).is_ok());
    }

    #[test]
    fn test_whole_container_move_within_tolerance() {
        assert!(ensure_whole_container_move(dec("250"), dec("250.00005")).is_ok());
    }

    #[test]
    fn test_partial_container_move_rejected() {
        assert!(matches!(
            ensure_whole_container_move(dec("250"), dec("100")),
            Err(AppError::PartialContainerMoveNotAllowed)
        ));
        assert!(matches!(
            ensure_whole_container_move(dec("250"), dec("250.001")),
            Err(AppError::PartialContainerMoveNotAllowed)
        ));
    }
}
