//! Error handling for the Lab Consumables Management Platform
//!
//! Business-rule violations map to 422 so clients can distinguish them
//! from plain input errors and offer an override path where one exists.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Authentication / authorization errors
    #[error("Invalid token")]
    InvalidToken,

    #[error("Capability denied: {0}")]
    CapabilityDenied(String),

    #[error("Negative-balance override denied")]
    OverrideDenied,

    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Quantity must be positive")]
    QuantityNotPositive,

    #[error("Unsupported unit: {0}")]
    UnsupportedUnit(String),

    #[error("Incompatible units: cannot convert {from} to {to}")]
    IncompatibleUnits { from: String, to: String },

    #[error("Invalid expiry date: {0}")]
    InvalidExpiry(String),

    #[error("Lot number and expiry are required for lot-tracked items")]
    LotRequired,

    #[error("A container is required for container-tracked items")]
    ContainerRequired,

    #[error("Override note is required when allowing a negative balance")]
    OverrideNoteRequired,

    // Referential integrity errors
    #[error("Holder not found: {0}")]
    HolderNotFound(String),

    #[error("Lot does not belong to the given item")]
    MismatchedLot,

    #[error("Container does not belong to the given item")]
    MismatchedContainer,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    // Business rule errors
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Reason code category mismatch: expected {expected}")]
    ReasonCodeCategoryMismatch { expected: String },

    #[error("Container quantities do not sum to the received total")]
    ContainerSumMismatch,

    #[error("Containers can only be moved in full")]
    PartialContainerMoveNotAllowed,

    #[error("Container is not at the source holder")]
    ContainerNotAtSource,

    #[error("Returns must go to the central store")]
    InvalidReturnDestination,

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Internal server error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code for the client
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidToken => "INVALID_TOKEN",
            AppError::CapabilityDenied(_) => "CAPABILITY_DENIED",
            AppError::OverrideDenied => "OVERRIDE_DENIED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::QuantityNotPositive => "QUANTITY_NOT_POSITIVE",
            AppError::UnsupportedUnit(_) => "UNSUPPORTED_UNIT",
            AppError::IncompatibleUnits { .. } => "INCOMPATIBLE_UNITS",
            AppError::InvalidExpiry(_) => "INVALID_EXPIRY",
            AppError::LotRequired => "LOT_REQUIRED",
            AppError::ContainerRequired => "CONTAINER_REQUIRED",
            AppError::OverrideNoteRequired => "OVERRIDE_NOTE_REQUIRED",
            AppError::HolderNotFound(_) => "HOLDER_NOT_FOUND",
            AppError::MismatchedLot => "MISMATCHED_LOT",
            AppError::MismatchedContainer => "MISMATCHED_CONTAINER",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            AppError::ReasonCodeCategoryMismatch { .. } => "REASON_CODE_CATEGORY_MISMATCH",
            AppError::ContainerSumMismatch => "CONTAINER_SUM_MISMATCH",
            AppError::PartialContainerMoveNotAllowed => "PARTIAL_CONTAINER_MOVE_NOT_ALLOWED",
            AppError::ContainerNotAtSource => "CONTAINER_NOT_AT_SOURCE",
            AppError::InvalidReturnDestination => "INVALID_RETURN_DESTINATION",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Internal(_) | AppError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::CapabilityDenied(_) | AppError::OverrideDenied => StatusCode::FORBIDDEN,
            AppError::Validation { .. }
            | AppError::QuantityNotPositive
            | AppError::UnsupportedUnit(_)
            | AppError::IncompatibleUnits { .. }
            | AppError::InvalidExpiry(_)
            | AppError::LotRequired
            | AppError::ContainerRequired
            | AppError::OverrideNoteRequired => StatusCode::BAD_REQUEST,
            AppError::HolderNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::MismatchedLot | AppError::MismatchedContainer => StatusCode::BAD_REQUEST,
            AppError::DuplicateEntry(_) => StatusCode::CONFLICT,
            AppError::InsufficientStock(_)
            | AppError::ReasonCodeCategoryMismatch { .. }
            | AppError::ContainerSumMismatch
            | AppError::PartialContainerMoveNotAllowed
            | AppError::ContainerNotAtSource
            | AppError::InvalidReturnDestination => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DatabaseError(e) if is_retryable(e) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::DatabaseError(_) | AppError::Internal(_) | AppError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Serialization failures and deadlocks abort the transaction but are
/// safe for the caller to retry; they get a distinct status.
fn is_retryable(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001") | Some("40P01")),
        _ => false,
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Whether the caller may safely retry the same request
    pub retryable: bool,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let field = match &self {
            AppError::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        let message = match &self {
            // Never leak raw database errors to the client
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalError(_) => "An internal server error occurred".to_string(),
            other => other.to_string(),
        };

        tracing::error!(code = self.code(), "Request failed: {:?}", self);

        let detail = ErrorDetail {
            code: self.code().to_string(),
            message,
            field,
            retryable: status == StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorResponse { error: detail })).into_response()
    }
}

/// Result type alias for handlers and services
pub type AppResult<T> = Result<T, AppError>;
