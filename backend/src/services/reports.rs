//! Read-side aggregations over balances and the ledger
//!
//! Everything here is derived data. Balance rows are maintained by the
//! write path; these queries only filter and aggregate them. Callers
//! without the reporting capability are scoped to their own office.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use shared::{
    Balance, BalanceSummary, Caller, HolderContext, HolderRef, HolderType, LedgerEntry,
    LedgerFilter, PaginatedResponse, Pagination, PaginationMeta,
};

use crate::error::{AppError, AppResult};
use crate::services::holder::HolderService;
use crate::services::inventory::{ledger_entry_from_row, LedgerRow};

#[derive(Clone)]
pub struct ReportService {
    db: PgPool,
    holders: HolderService,
    expiry_horizon_days: i64,
}

/// Query parameters for the balance listing
#[derive(Debug, Default, Deserialize)]
pub struct BalanceQuery {
    pub item_id: Option<Uuid>,
    /// Restrict to one lot; implies per-lot rows
    pub lot_id: Option<Uuid>,
    /// Include one row per lot instead of aggregating per item
    #[serde(default)]
    pub by_lot: bool,
}

/// One row of the item rollup: total on hand for an item at one holder
/// type, broken down by office where applicable
#[derive(Debug, Clone, Serialize)]
pub struct RollupRow {
    pub consumable_item_id: Uuid,
    pub item_name: String,
    pub base_unit: String,
    pub holder_type: HolderType,
    pub office_id: Option<Uuid>,
    pub office_name: Option<String>,
    pub total_on_hand_base: Decimal,
}

/// One lot approaching (or past) its expiry date
#[derive(Debug, Clone, Serialize)]
pub struct ExpiringLot {
    pub lot_id: Uuid,
    pub batch_number: String,
    pub consumable_item_id: Uuid,
    pub item_name: String,
    pub base_unit: String,
    pub expiry_date: NaiveDate,
    pub days_until_expiry: i64,
    pub holder_type: HolderType,
    pub holder_id: Uuid,
    pub office_id: Option<Uuid>,
    pub quantity_on_hand_base: Decimal,
}

/// Query parameters for the expiry report
#[derive(Debug, Default, Deserialize)]
pub struct ExpiryQuery {
    /// Lookahead window in days; falls back to the configured default
    pub horizon_days: Option<i64>,
    pub item_id: Option<Uuid>,
    pub office_id: Option<Uuid>,
}

impl ReportService {
    pub fn new(db: PgPool, holders: HolderService, expiry_horizon_days: i64) -> Self {
        Self {
            db,
            holders,
            expiry_horizon_days,
        }
    }

    /// Balances at one holder
    ///
    /// Aggregated per item by default; `by_lot` (or a lot filter) returns
    /// the underlying per-lot rows instead.
    pub async fn holder_balances(
        &self,
        caller: &Caller,
        holder_ref: HolderRef,
        query: BalanceQuery,
    ) -> AppResult<Vec<BalanceSummary>> {
        let holder = self.holders.resolve(holder_ref).await?;
        ensure_report_scope(caller, &holder)?;

        if query.by_lot || query.lot_id.is_some() {
            let rows = self
                .lot_balances(holder_ref, query.item_id, query.lot_id)
                .await?;
            return Ok(rows);
        }

        let rows = sqlx::query_as::<_, (Uuid, String, String, Decimal, i64)>(
            r#"
            SELECT b.consumable_item_id, i.name, i.base_unit,
                   SUM(b.quantity_on_hand_base) AS quantity_on_hand_base,
                   COUNT(b.lot_id) AS lot_count
            FROM balances b
            JOIN consumable_items i ON i.id = b.consumable_item_id
            WHERE b.holder_type = $1
              AND b.holder_id = $2
              AND ($3::uuid IS NULL OR b.consumable_item_id = $3)
            GROUP BY b.consumable_item_id, i.name, i.base_unit
            HAVING SUM(b.quantity_on_hand_base) <> 0
            ORDER BY i.name
            "#,
        )
        .bind(holder_ref.kind.as_str())
        .bind(holder_ref.id)
        .bind(query.item_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(consumable_item_id, item_name, base_unit, quantity_on_hand_base, lot_count)| {
                    BalanceSummary {
                        holder_type: holder_ref.kind,
                        holder_id: holder_ref.id,
                        consumable_item_id,
                        item_name,
                        base_unit,
                        quantity_on_hand_base,
                        lot_count,
                    }
                },
            )
            .collect())
    }

    async fn lot_balances(
        &self,
        holder_ref: HolderRef,
        item_id: Option<Uuid>,
        lot_id: Option<Uuid>,
    ) -> AppResult<Vec<BalanceSummary>> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, Option<Uuid>, Decimal)>(
            r#"
            SELECT b.consumable_item_id, i.name, i.base_unit, b.lot_id, b.quantity_on_hand_base
            FROM balances b
            JOIN consumable_items i ON i.id = b.consumable_item_id
            WHERE b.holder_type = $1
              AND b.holder_id = $2
              AND ($3::uuid IS NULL OR b.consumable_item_id = $3)
              AND ($4::uuid IS NULL OR b.lot_id = $4)
              AND b.quantity_on_hand_base <> 0
            ORDER BY i.name, b.lot_id
            "#,
        )
        .bind(holder_ref.kind.as_str())
        .bind(holder_ref.id)
        .bind(item_id)
        .bind(lot_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(consumable_item_id, item_name, base_unit, row_lot_id, quantity_on_hand_base)| {
                    BalanceSummary {
                        holder_type: holder_ref.kind,
                        holder_id: holder_ref.id,
                        consumable_item_id,
                        item_name,
                        base_unit,
                        quantity_on_hand_base,
                        lot_count: i64::from(row_lot_id.is_some()),
                    }
                },
            )
            .collect())
    }

    /// Raw per-lot balance rows for one (holder, item) pair
    pub async fn item_balance(
        &self,
        caller: &Caller,
        holder_ref: HolderRef,
        item_id: Uuid,
    ) -> AppResult<Vec<Balance>> {
        let holder = self.holders.resolve(holder_ref).await?;
        ensure_report_scope(caller, &holder)?;

        let rows = sqlx::query_as::<_, (Option<Uuid>, Decimal, Decimal)>(
            r#"
            SELECT lot_id, quantity_on_hand_base, quantity_reserved_base
            FROM balances
            WHERE holder_type = $1 AND holder_id = $2 AND consumable_item_id = $3
            ORDER BY lot_id
            "#,
        )
        .bind(holder_ref.kind.as_str())
        .bind(holder_ref.id)
        .bind(item_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(lot_id, on_hand, reserved)| Balance {
                holder_type: holder_ref.kind,
                holder_id: holder_ref.id,
                consumable_item_id: item_id,
                lot_id,
                quantity_on_hand_base: on_hand,
                quantity_reserved_base: reserved,
            })
            .collect())
    }

    /// System-wide rollup: on-hand totals per item per holder type, with
    /// office attribution for office-scoped holders
    pub async fn rollup(&self, caller: &Caller, item_id: Option<Uuid>) -> AppResult<Vec<RollupRow>> {
        if !caller.capabilities.view_reports {
            return Err(AppError::CapabilityDenied(
                "missing inventory:view_reports capability".to_string(),
            ));
        }

        let rows = sqlx::query_as::<
            _,
            (Uuid, String, String, String, Option<Uuid>, Option<String>, Decimal),
        >(
            r#"
            SELECT b.consumable_item_id, i.name, i.base_unit, b.holder_type,
                   o.id AS office_id, o.name AS office_name,
                   SUM(b.quantity_on_hand_base) AS total_on_hand_base
            FROM balances b
            JOIN consumable_items i ON i.id = b.consumable_item_id
            LEFT JOIN offices o ON o.id = CASE b.holder_type
                WHEN 'office' THEN b.holder_id
                WHEN 'sub_location' THEN (SELECT office_id FROM sub_locations WHERE id = b.holder_id)
                WHEN 'employee' THEN (SELECT office_id FROM employees WHERE id = b.holder_id)
            END
            WHERE ($1::uuid IS NULL OR b.consumable_item_id = $1)
            GROUP BY b.consumable_item_id, i.name, i.base_unit, b.holder_type, o.id, o.name
            HAVING SUM(b.quantity_on_hand_base) <> 0
            ORDER BY i.name, b.holder_type, o.name
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(
                |(consumable_item_id, item_name, base_unit, holder_type, office_id, office_name, total)| {
                    let holder_type = HolderType::from_str(&holder_type).ok_or_else(|| {
                        AppError::Internal(format!("Unknown holder type: {}", holder_type))
                    })?;
                    Ok(RollupRow {
                        consumable_item_id,
                        item_name,
                        base_unit,
                        holder_type,
                        office_id,
                        office_name,
                        total_on_hand_base: total,
                    })
                },
            )
            .collect()
    }

    /// Filtered, paginated ledger history, newest first
    pub async fn ledger(
        &self,
        caller: &Caller,
        filter: LedgerFilter,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<LedgerEntry>> {
        if !caller.capabilities.view_reports {
            // Without the reporting capability the query must name a
            // holder inside the caller's office scope
            let (Some(kind), Some(id)) = (filter.holder_type, filter.holder_id) else {
                return Err(AppError::CapabilityDenied(
                    "ledger queries without inventory:view_reports must name a holder".to_string(),
                ));
            };
            let holder = self.holders.resolve(HolderRef::new(kind, id)).await?;
            ensure_report_scope(caller, &holder)?;
        }

        let entry_type = filter.entry_type.map(|t| t.as_str());
        let holder_type = filter.holder_type.map(|t| t.as_str());

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM ledger_entries
            WHERE ($1::uuid IS NULL OR consumable_item_id = $1)
              AND ($2::uuid IS NULL OR lot_id = $2)
              AND ($3::text IS NULL OR entry_type = $3)
              AND ($4::text IS NULL OR from_holder_type = $4 OR to_holder_type = $4)
              AND ($5::uuid IS NULL OR from_holder_id = $5 OR to_holder_id = $5)
              AND ($6::timestamptz IS NULL OR timestamp >= $6)
              AND ($7::timestamptz IS NULL OR timestamp <= $7)
            "#,
        )
        .bind(filter.item_id)
        .bind(filter.lot_id)
        .bind(entry_type)
        .bind(holder_type)
        .bind(filter.holder_id)
        .bind(filter.from)
        .bind(filter.to)
        .fetch_one(&self.db)
        .await?;

        let rows = sqlx::query_as::<_, LedgerRow>(
            r#"
            SELECT id, entry_type, timestamp, actor_id, from_holder_type, from_holder_id,
                   to_holder_type, to_holder_id, consumable_item_id, lot_id, container_id,
                   quantity_base, entered_quantity, entered_unit, reason_code_id,
                   reference, notes, metadata
            FROM ledger_entries
            WHERE ($1::uuid IS NULL OR consumable_item_id = $1)
              AND ($2::uuid IS NULL OR lot_id = $2)
              AND ($3::text IS NULL OR entry_type = $3)
              AND ($4::text IS NULL OR from_holder_type = $4 OR to_holder_type = $4)
              AND ($5::uuid IS NULL OR from_holder_id = $5 OR to_holder_id = $5)
              AND ($6::timestamptz IS NULL OR timestamp >= $6)
              AND ($7::timestamptz IS NULL OR timestamp <= $7)
            ORDER BY timestamp DESC, id DESC
            LIMIT $8 OFFSET $9
            "#,
        )
        .bind(filter.item_id)
        .bind(filter.lot_id)
        .bind(entry_type)
        .bind(holder_type)
        .bind(filter.holder_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(pagination.limit())
        .bind(pagination.offset())
        .fetch_all(&self.db)
        .await?;

        let data = rows
            .into_iter()
            .map(ledger_entry_from_row)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(&pagination, total as u64),
        })
    }

    /// Lots with remaining stock expiring inside the horizon, soonest
    /// first; already-expired lots come back with negative days
    pub async fn expiring_lots(
        &self,
        caller: &Caller,
        query: ExpiryQuery,
    ) -> AppResult<Vec<ExpiringLot>> {
        if !caller.capabilities.view_reports {
            return Err(AppError::CapabilityDenied(
                "missing inventory:view_reports capability".to_string(),
            ));
        }

        let horizon = query.horizon_days.unwrap_or(self.expiry_horizon_days);
        if horizon < 0 {
            return Err(AppError::Validation {
                field: "horizon_days".to_string(),
                message: "Horizon cannot be negative".to_string(),
            });
        }
        let today = Utc::now().date_naive();
        let cutoff = today + chrono::Duration::days(horizon);

        let rows = sqlx::query_as::<
            _,
            (Uuid, String, Uuid, String, String, NaiveDate, String, Uuid, Option<Uuid>, Decimal),
        >(
            r#"
            SELECT l.id, l.batch_number, l.consumable_item_id, i.name, i.base_unit,
                   l.expiry_date, b.holder_type, b.holder_id,
                   CASE b.holder_type
                       WHEN 'office' THEN b.holder_id
                       WHEN 'sub_location' THEN (SELECT office_id FROM sub_locations WHERE id = b.holder_id)
                       WHEN 'employee' THEN (SELECT office_id FROM employees WHERE id = b.holder_id)
                   END AS office_id,
                   b.quantity_on_hand_base
            FROM balances b
            JOIN lots l ON l.id = b.lot_id
            JOIN consumable_items i ON i.id = l.consumable_item_id
            WHERE b.quantity_on_hand_base > 0
              AND l.expiry_date IS NOT NULL
              AND l.expiry_date <= $1
              AND ($2::uuid IS NULL OR l.consumable_item_id = $2)
            ORDER BY l.expiry_date, i.name
            "#,
        )
        .bind(cutoff)
        .bind(query.item_id)
        .fetch_all(&self.db)
        .await?;

        let mut lots = Vec::with_capacity(rows.len());
        for (
            lot_id,
            batch_number,
            consumable_item_id,
            item_name,
            base_unit,
            expiry_date,
            holder_type,
            holder_id,
            office_id,
            quantity_on_hand_base,
        ) in rows
        {
            if let Some(wanted_office) = query.office_id {
                if office_id != Some(wanted_office) {
                    continue;
                }
            }
            let holder_type = HolderType::from_str(&holder_type)
                .ok_or_else(|| AppError::Internal(format!("Unknown holder type: {}", holder_type)))?;
            lots.push(ExpiringLot {
                lot_id,
                batch_number,
                consumable_item_id,
                item_name,
                base_unit,
                expiry_date,
                days_until_expiry: (expiry_date - today).num_days(),
                holder_type,
                holder_id,
                office_id,
                quantity_on_hand_base,
            });
        }

        Ok(lots)
    }

}

/// Office scoping for reads: the reporting capability sees everything,
/// everyone else is limited to holders in their own office or their own
/// employee holder.
fn ensure_report_scope(caller: &Caller, holder: &HolderContext) -> AppResult<()> {
    if caller.capabilities.view_reports {
        return Ok(());
    }
    if holder.holder_type == HolderType::Employee
        && caller.employee_holder_id == Some(holder.holder_id)
    {
        return Ok(());
    }
    let office = holder.scope_office_id();
    if office.is_some() && office == caller.office_id {
        return Ok(());
    }
    Err(AppError::CapabilityDenied(
        "lookup outside your office scope".to_string(),
    ))
}
