//! Lab Consumables Management Platform - Backend Server
//!
//! Ledger-backed inventory engine for laboratory consumables: receipts,
//! transfers, consumption, adjustments, disposal and reporting across
//! the central store, offices, sub-locations and employees.

use axum::{routing::get, Router};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod services;

pub use config::Config;

use services::{
    AuditService, CatalogService, HolderService, InventoryService, LotService, ReportService,
    UnitService,
};

/// Application state shared across handlers
///
/// The unit service lives here because it owns the snapshot cache; the
/// other services are cheap to construct per request.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub units: UnitService,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Self {
        let units = UnitService::new(
            db.clone(),
            Duration::from_secs(config.inventory.unit_cache_ttl_seconds),
        );
        Self {
            db,
            config: Arc::new(config),
            units,
        }
    }

    pub fn inventory_service(&self) -> InventoryService {
        InventoryService::new(
            self.db.clone(),
            self.units.clone(),
            HolderService::new(self.db.clone()),
            CatalogService::new(self.db.clone()),
            LotService::new(self.db.clone()),
            AuditService::new(self.db.clone()),
        )
    }

    pub fn report_service(&self) -> ReportService {
        ReportService::new(
            self.db.clone(),
            HolderService::new(self.db.clone()),
            self.config.inventory.default_expiry_horizon_days,
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lcm_server=debug,tower_http=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::load()?;

    tracing::info!("Starting Lab Consumables Management Server");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database.url)
        .await?;

    tracing::info!("Database connection established");

    // Run migrations in development
    if config.environment == "development" {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    // Create application state
    let port = config.server.port;
    let state = AppState::new(db_pool, config);

    // Build application
    let app = create_app(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes and middleware
fn create_app(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .nest("/api/v1", routes::api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Root endpoint
async fn root() -> &'static str {
    "Lab Consumables Management Platform API v1.0"
}
