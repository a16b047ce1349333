//! `/api/v1` routes per §6's external interface table.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::response::{success, ApiResponse};
use crate::config::AppConfig;
use crate::controller::AppState;

pub fn router(state: AppState, cfg: &AppConfig) -> Router {
    Router::new()
        .route("/status", get(status))
        .route("/config", get(get_config))
        .route("/control", post(control))
        .route("/adjust_power", post(adjust_power))
        .route("/recalculate_plan", post(recalculate_plan))
        .route("/charging_plan", get(charging_plan))
        .route("/charging_status", get(status))
        .route("/consumption_learning", get(consumption_learning))
        .route("/consumption_import_csv", post(consumption_import_csv))
        .route(
            "/consumption_data",
            get(consumption_data).post(add_consumption_data),
        )
        .route("/logs", get(logs))
        .with_state(state)
        .layer(crate::auth::auth_layer(cfg.auth.token.clone()))
}

async fn status(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    success(state.status().await)
}

async fn get_config(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    success(state.cfg.planner.clone())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ControlAction {
    StartCharging,
    StopCharging,
    AutoMode,
    ToggleAutomation,
    TestConnection,
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    action: ControlAction,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ControlResult {
    accepted: bool,
    detail: Option<String>,
}

async fn control(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Result<ApiResponse<ControlResult>, ApiError> {
    let result = match req.action {
        ControlAction::StartCharging => {
            state
                .start_charging()
                .await
                .map_err(|e| ApiError::HardwareError(e.to_string()))?;
            ControlResult { accepted: true, detail: None }
        }
        ControlAction::StopCharging => {
            state
                .stop_charging()
                .await
                .map_err(|e| ApiError::HardwareError(e.to_string()))?;
            ControlResult { accepted: true, detail: None }
        }
        ControlAction::AutoMode => {
            state.toggle_automation(true).await;
            ControlResult { accepted: true, detail: None }
        }
        ControlAction::ToggleAutomation => {
            state.toggle_automation(req.enabled.unwrap_or(true)).await;
            ControlResult { accepted: true, detail: None }
        }
        ControlAction::TestConnection => {
            let reachable = state.test_connection().await;
            ControlResult {
                accepted: reachable,
                detail: Some(if reachable { "reachable".into() } else { "unreachable".into() }),
            }
        }
    };
    Ok(success(result))
}

#[derive(Debug, Deserialize)]
struct AdjustPowerRequest {
    power: i32,
}

async fn adjust_power(
    State(state): State<AppState>,
    Json(req): Json<AdjustPowerRequest>,
) -> Result<ApiResponse<bool>, ApiError> {
    let accepted = state.adjust_power(req.power).await.map_err(|e| match e {
        crate::controller::AdjustPowerError::NotCharging => ApiError::BadRequest(e.to_string()),
        crate::controller::AdjustPowerError::Hardware(_) => ApiError::HardwareError(e.to_string()),
    })?;
    Ok(success(accepted))
}

async fn recalculate_plan(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    state.recalculate_plan().await;
    success(state.charging_plan().await)
}

async fn charging_plan(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    success(state.charging_plan().await)
}

#[derive(Debug, Serialize)]
struct ConsumptionLearningResponse {
    statistics: crate::domain::ConsumptionStatistics,
    profile: BTreeMap<u32, f64>,
}

async fn consumption_learning(
    State(state): State<AppState>,
) -> Result<ApiResponse<ConsumptionLearningResponse>, ApiError> {
    let statistics = state
        .consumption_statistics()
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    let profile = state
        .hourly_consumption_profile()
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    Ok(success(ConsumptionLearningResponse { statistics, profile }))
}

async fn consumption_import_csv(
    State(state): State<AppState>,
    body: String,
) -> Result<ApiResponse<crate::domain::ImportReport>, ApiError> {
    let report = state
        .import_consumption_csv(&body)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(success(report))
}

async fn consumption_data(
    State(state): State<AppState>,
) -> Result<ApiResponse<BTreeMap<u32, f64>>, ApiError> {
    let profile = state
        .hourly_consumption_profile()
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    Ok(success(profile))
}

async fn add_consumption_data(
    State(state): State<AppState>,
    Json(profile): Json<BTreeMap<u32, f64>>,
) -> Result<ApiResponse<()>, ApiError> {
    state
        .add_manual_consumption(&profile)
        .await
        .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
    Ok(success(()))
}

async fn logs(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    success(state.logs())
}
