mod handlers;
mod middleware;

pub use middleware::SecurityConfig;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::host::FreePackages;
use self::middleware::auth_middleware;

pub fn create_router(service: FreePackages) -> Router {
    create_router_with_config(service, SecurityConfig::disabled())
}

pub fn create_router_with_config(service: FreePackages, security: SecurityConfig) -> Router {
    let api = Router::new()
        // Stream cursor and combined status
        .route("/status", get(handlers::get_status))
        .route("/cursor", get(handlers::get_cursor))
        .route("/command", post(handlers::run_command))
        // Accounts
        .route("/accounts", get(handlers::list_accounts))
        .route(
            "/accounts/{id}",
            get(handlers::get_account).delete(handlers::disable_account),
        )
        .route("/accounts/{id}/config", put(handlers::configure_account))
        .route("/accounts/{id}/activity", post(handlers::report_activity))
        .route("/accounts/{id}/licenses", put(handlers::update_licenses))
        .route("/accounts/{id}/claims", get(handlers::list_claims))
        .layer(from_fn_with_state(security, auth_middleware))
        // Health stays reachable without a key
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}
