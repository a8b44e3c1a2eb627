use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::commands;
use crate::config::ConfigError;
use crate::host::FreePackages;
use crate::models::*;

// ============================================================
// Error Handling
// ============================================================

/// Log an internal error and return a sanitized response to the client.
fn internal_error(e: impl std::fmt::Display) -> (StatusCode, String) {
    tracing::error!("Internal error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Internal server error".to_string(),
    )
}

/// Configuration problems are the caller's fault and safe to echo back.
fn config_error(e: ConfigError) -> (StatusCode, String) {
    match e {
        ConfigError::Invalid(msg) => {
            tracing::warn!("Validation error: {}", msg);
            (StatusCode::BAD_REQUEST, msg)
        }
        other => internal_error(other),
    }
}

fn account_not_found() -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        "Claiming is not enabled for this account".to_string(),
    )
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Status
// ============================================================

pub async fn get_status(
    State(service): State<FreePackages>,
) -> Result<Json<StatusReport>, (StatusCode, String)> {
    service.status_report().await.map(Json).map_err(internal_error)
}

pub async fn get_cursor(
    State(service): State<FreePackages>,
) -> Result<Json<CursorSummary>, (StatusCode, String)> {
    service.db().cursor_summary().map(Json).map_err(internal_error)
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub response: String,
}

pub async fn run_command(
    State(service): State<FreePackages>,
    Json(input): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, (StatusCode, String)> {
    commands::respond(&service, &input.message)
        .await
        .map(|response| Json(CommandResponse { response }))
        .ok_or((
            StatusCode::BAD_REQUEST,
            format!("Unknown command: {}", input.message),
        ))
}

// ============================================================
// Accounts
// ============================================================

pub async fn list_accounts(State(service): State<FreePackages>) -> Json<Vec<AccountStatus>> {
    Json(service.registry().statuses().await)
}

pub async fn get_account(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
) -> Result<Json<AccountStatus>, (StatusCode, String)> {
    service
        .registry()
        .status(&id)
        .await
        .map(Json)
        .ok_or_else(account_not_found)
}

#[derive(Debug, Serialize)]
pub struct ConfigureResponse {
    pub account_id: String,
    pub enabled: bool,
}

pub async fn configure_account(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
    Json(config): Json<serde_json::Value>,
) -> Result<Json<ConfigureResponse>, (StatusCode, String)> {
    let enabled = service
        .on_account_module_init(&id, &config)
        .await
        .map_err(config_error)?;
    Ok(Json(ConfigureResponse {
        account_id: id,
        enabled,
    }))
}

pub async fn disable_account(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    if service.registry().is_enabled(&id) {
        service.on_account_disconnected(&id).await;
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(account_not_found())
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityInput {
    pub state: ActivityState,
}

pub async fn report_activity(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
    Json(input): Json<ActivityInput>,
) -> StatusCode {
    service.on_activity(&id, input.state);
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
pub struct LicensesInput {
    pub entries: Vec<EntryId>,
}

pub async fn update_licenses(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
    Json(input): Json<LicensesInput>,
) -> Result<StatusCode, (StatusCode, String)> {
    if service.on_license_list(&id, input.entries) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(account_not_found())
    }
}

#[derive(Debug, Deserialize)]
pub struct ClaimsQuery {
    pub limit: Option<usize>,
}

pub async fn list_claims(
    State(service): State<FreePackages>,
    Path(id): Path<String>,
    Query(query): Query<ClaimsQuery>,
) -> Result<Json<Vec<ClaimRecord>>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(50).min(500);
    service
        .db()
        .get_claims(&id, limit)
        .map(Json)
        .map_err(internal_error)
}
