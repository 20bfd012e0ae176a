//! HTTP handlers for balance, rollup, ledger and expiry reads

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use shared::{
    Balance, BalanceSummary, HolderRef, HolderType, LedgerEntry, LedgerEntryType, LedgerFilter,
    PaginatedResponse, Pagination,
};

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::reports::{BalanceQuery, ExpiringLot, ExpiryQuery, RollupRow};
use crate::AppState;

fn parse_holder(holder_type: &str, holder_id: Uuid) -> AppResult<HolderRef> {
    let kind = HolderType::from_str(holder_type).ok_or_else(|| AppError::Validation {
        field: "holder_type".to_string(),
        message: format!("Unknown holder type: {}", holder_type),
    })?;
    Ok(HolderRef::new(kind, holder_id))
}

/// Balances at one holder, aggregated per item
pub async fn holder_balances(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((holder_type, holder_id)): Path<(String, Uuid)>,
    Query(query): Query<BalanceQuery>,
) -> AppResult<Json<Vec<BalanceSummary>>> {
    let holder = parse_holder(&holder_type, holder_id)?;
    let service = state.report_service();
    let balances = service
        .holder_balances(&current_user.0.caller(), holder, query)
        .await?;
    Ok(Json(balances))
}

/// Per-lot balance rows for one (holder, item) pair
pub async fn item_balance(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path((holder_type, holder_id, item_id)): Path<(String, Uuid, Uuid)>,
) -> AppResult<Json<Vec<Balance>>> {
    let holder = parse_holder(&holder_type, holder_id)?;
    let service = state.report_service();
    let balances = service
        .item_balance(&current_user.0.caller(), holder, item_id)
        .await?;
    Ok(Json(balances))
}

#[derive(Debug, Default, Deserialize)]
pub struct RollupQuery {
    pub item_id: Option<Uuid>,
}

/// System-wide on-hand rollup per item and holder type
pub async fn rollup(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<RollupQuery>,
) -> AppResult<Json<Vec<RollupRow>>> {
    let service = state.report_service();
    let rows = service.rollup(&current_user.0.caller(), query.item_id).await?;
    Ok(Json(rows))
}

/// Query parameters for the ledger listing
#[derive(Debug, Default, Deserialize)]
pub struct LedgerQuery {
    pub item_id: Option<Uuid>,
    pub lot_id: Option<Uuid>,
    pub entry_type: Option<String>,
    pub holder_type: Option<String>,
    pub holder_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Filtered ledger history, newest first
pub async fn ledger(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<LedgerQuery>,
) -> AppResult<Json<PaginatedResponse<LedgerEntry>>> {
    let entry_type = query
        .entry_type
        .as_deref()
        .map(|raw| {
            LedgerEntryType::from_str(raw).ok_or_else(|| AppError::Validation {
                field: "entry_type".to_string(),
                message: format!("Unknown entry type: {}", raw),
            })
        })
        .transpose()?;
    let holder_type = query
        .holder_type
        .as_deref()
        .map(|raw| {
            HolderType::from_str(raw).ok_or_else(|| AppError::Validation {
                field: "holder_type".to_string(),
                message: format!("Unknown holder type: {}", raw),
            })
        })
        .transpose()?;

    let filter = LedgerFilter {
        item_id: query.item_id,
        lot_id: query.lot_id,
        entry_type,
        holder_type,
        holder_id: query.holder_id,
        from: query.from,
        to: query.to,
    };
    let defaults = Pagination::default();
    let pagination = Pagination {
        page: query.page.unwrap_or(defaults.page).max(1),
        per_page: query.per_page.unwrap_or(defaults.per_page).clamp(1, 200),
    };

    let service = state.report_service();
    let page = service
        .ledger(&current_user.0.caller(), filter, pagination)
        .await?;
    Ok(Json(page))
}

/// Lots expiring inside the horizon
pub async fn expiring_lots(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ExpiryQuery>,
) -> AppResult<Json<Vec<ExpiringLot>>> {
    let service = state.report_service();
    let lots = service
        .expiring_lots(&current_user.0.caller(), query)
        .await?;
    Ok(Json(lots))
}
