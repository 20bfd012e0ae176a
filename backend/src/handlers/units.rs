//! HTTP handlers for the unit registry

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use shared::UnitDefinition;

use crate::error::{AppError, AppResult};
use crate::middleware::CurrentUser;
use crate::services::units::{CreateUnitInput, UpdateUnitInput};
use crate::AppState;

fn require_unit_admin(user: &crate::middleware::AuthUser) -> AppResult<()> {
    if user.has_permission("inventory", "manage_units") {
        Ok(())
    } else {
        Err(AppError::CapabilityDenied(
            "missing inventory:manage_units capability".to_string(),
        ))
    }
}

/// List all registered units
pub async fn list_units(
    State(state): State<AppState>,
    _current_user: CurrentUser,
) -> AppResult<Json<Vec<UnitDefinition>>> {
    let units = state.units.list_units().await?;
    Ok(Json(units))
}

/// Register a new unit
pub async fn create_unit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Json(input): Json<CreateUnitInput>,
) -> AppResult<(StatusCode, Json<UnitDefinition>)> {
    require_unit_admin(&current_user.0)?;
    let unit = state.units.create_unit(input).await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

/// Update a unit's conversion factor or aliases
pub async fn update_unit(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(unit_id): Path<Uuid>,
    Json(input): Json<UpdateUnitInput>,
) -> AppResult<Json<UnitDefinition>> {
    require_unit_admin(&current_user.0)?;
    let unit = state.units.update_unit(unit_id, input).await?;
    Ok(Json(unit))
}
