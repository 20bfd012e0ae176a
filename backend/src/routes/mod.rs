//! Route definitions for the Lab Consumables Management Platform

use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::{handlers, middleware::auth_middleware, AppState};

/// Create API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health check (public)
        .route("/health", get(handlers::health_check))
        // Protected routes - inventory operations
        .nest("/inventory", inventory_routes())
        // Protected routes - unit registry
        .nest("/units", unit_routes())
        // Protected routes - balances and reports
        .nest("/balances", balance_routes())
        .nest("/ledger", ledger_routes())
        .nest("/reports", report_routes())
}

/// Inventory write operations (protected)
fn inventory_routes() -> Router<AppState> {
    Router::new()
        .route("/receive", post(handlers::receive))
        .route("/transfer", post(handlers::transfer))
        .route("/consume", post(handlers::consume))
        .route("/adjust", post(handlers::adjust))
        .route("/dispose", post(handlers::dispose))
        .route("/return", post(handlers::return_stock))
        .route("/opening-balance", post(handlers::opening_balance))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Unit registry routes (protected)
fn unit_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_units).post(handlers::create_unit))
        .route("/:unit_id", put(handlers::update_unit))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Balance read routes (protected)
fn balance_routes() -> Router<AppState> {
    Router::new()
        .route("/:holder_type/:holder_id", get(handlers::holder_balances))
        .route(
            "/:holder_type/:holder_id/items/:item_id",
            get(handlers::item_balance),
        )
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Ledger history routes (protected)
fn ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::ledger))
        .route_layer(middleware::from_fn(auth_middleware))
}

/// Reporting routes (protected)
fn report_routes() -> Router<AppState> {
    Router::new()
        .route("/rollup", get(handlers::rollup))
        .route("/expiry", get(handlers::expiring_lots))
        .route_layer(middleware::from_fn(auth_middleware))
}
