//! Rackmend Server - Defect & Repair Workflow Engine
//!
//! REST API server governing the lifecycle of hardware defect records.

use axum::{
    routing::{get, patch, post, put},
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rackmend_server::{
    api,
    config::AppConfig,
    repository::Repository,
    services::Services,
    workflow::SlaPolicy,
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().expect("Failed to load configuration");

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("rackmend_server={},tower_http=debug", config.logging.level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Rackmend Server v{}", env!("CARGO_PKG_VERSION"));

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations completed");

    // Save server address before moving config
    let server_host = config.server.host.clone();
    let server_port = config.server.port;

    // Create repository and services
    let repository = Repository::new(pool);
    let policy = SlaPolicy::from_config(&config.workflow);
    let services = Services::new(repository, policy);

    // Create application state
    let state = AppState {
        config: Arc::new(config),
        services: Arc::new(services),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(
        server_host.parse().expect("Invalid host address"),
        server_port,
    );

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Defect records
        .route("/defects", get(api::defects::list_defects))
        .route("/defects", post(api::defects::create_defect))
        .route("/defects/stats", get(api::stats::get_stats))
        .route("/defects/:id", get(api::defects::get_defect))
        .route("/defects/:id/actions", get(api::defects::get_available_actions))
        .route("/defects/:id/history", get(api::defects::get_history))
        // Workflow transitions
        .route("/defects/:id/start-diagnosis", post(api::defects::start_diagnosis))
        .route("/defects/:id/complete-diagnosis", post(api::defects::complete_diagnosis))
        .route("/defects/:id/waiting-parts", post(api::defects::set_waiting_parts))
        .route("/defects/:id/reserve", post(api::defects::reserve_component))
        .route("/defects/:id/start-repair", post(api::defects::start_repair))
        .route("/defects/:id/replacement", post(api::defects::perform_replacement))
        .route("/defects/:id/send-to-vendor", post(api::defects::send_to_vendor))
        .route("/defects/:id/return-from-vendor", post(api::defects::return_from_vendor))
        .route("/defects/:id/substitute", post(api::defects::issue_substitute))
        .route("/defects/:id/substitute/return", post(api::defects::return_substitute))
        .route("/defects/:id/resolve", post(api::defects::resolve_defect))
        // Administrative
        .route("/defects/:id/status", put(api::defects::update_status))
        .route("/defects/:id/notes", patch(api::defects::update_notes))
        // Availability probes
        .route("/inventory/:id/availability", get(api::defects::component_availability))
        .route("/substitutes/:id/availability", get(api::defects::substitute_availability))
        .with_state(state.clone());

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
