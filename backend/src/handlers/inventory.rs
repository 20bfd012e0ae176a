//! HTTP handlers for inventory write operations

use axum::{extract::State, http::StatusCode, Json};

use shared::LedgerEntry;

use crate::error::AppResult;
use crate::middleware::CurrentUser;
use crate::services::inventory::{
    AdjustInput, ConsumeInput, DisposeInput, OpeningBalanceInput, ReceiveInput, ReturnInput,
    TransferInput,
};
use crate::AppState;

/// Receive stock into the central store
pub async fn receive(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReceiveInput>,
) -> AppResult<(StatusCode, Json<LedgerEntry>)> {
    let service = state.inventory_service();
    let entry = service.receive(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Transfer stock between holders
pub async fn transfer(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<TransferInput>,
) -> AppResult<(StatusCode, Json<Vec<LedgerEntry>>)> {
    let service = state.inventory_service();
    let entries = service.transfer(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// Consume stock at a holder
pub async fn consume(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ConsumeInput>,
) -> AppResult<(StatusCode, Json<Vec<LedgerEntry>>)> {
    let service = state.inventory_service();
    let entries = service.consume(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// Apply a signed stock adjustment
pub async fn adjust(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<AdjustInput>,
) -> AppResult<(StatusCode, Json<LedgerEntry>)> {
    let service = state.inventory_service();
    let entry = service.adjust(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// Dispose stock at a holder
pub async fn dispose(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<DisposeInput>,
) -> AppResult<(StatusCode, Json<Vec<LedgerEntry>>)> {
    let service = state.inventory_service();
    let entries = service.dispose(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// Return stock from an office to the central store
pub async fn return_stock(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<ReturnInput>,
) -> AppResult<(StatusCode, Json<Vec<LedgerEntry>>)> {
    let service = state.inventory_service();
    let entries = service.return_stock(&current_user.0.caller(), input).await?;
    Ok((StatusCode::CREATED, Json(entries)))
}

/// Seed opening balances
pub async fn opening_balance(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<OpeningBalanceInput>,
) -> AppResult<(StatusCode, Json<Vec<LedgerEntry>>)> {
    let service = state.inventory_service();
    let entries = service
        .opening_balance(&current_user.0.caller(), input)
        .await?;
    Ok((StatusCode::CREATED, Json(entries)))
}
