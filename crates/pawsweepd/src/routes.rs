//! API routes for pawsweepd
//!
//! Error bodies are `{"error": <code>, "message": <text>}` where `code` is the
//! stable reason string of the underlying error.

use crate::server::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pawsweep_shared::{
    CaptureError, CleaningError, ConfigUpdateError, CycleError, InferenceError, InferenceVerdict,
    PerformanceSnapshot, PresenceState, StatusSnapshot,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type AppStateArc = Arc<AppState>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, code: &str, message: impl ToString) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
}

fn coordinator_gone() -> ApiError {
    api_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "stopped",
        "coordinator is not running",
    )
}

// ============================================================================
// Status Routes
// ============================================================================

pub fn status_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/sensor", get(get_sensor))
        .route("/api/performance", get(get_performance))
}

async fn get_status(State(state): State<AppStateArc>) -> Result<Json<StatusSnapshot>, ApiError> {
    state
        .coordinator
        .status()
        .await
        .map(Json)
        .ok_or_else(coordinator_gone)
}

async fn get_sensor(State(state): State<AppStateArc>) -> Result<Json<PresenceState>, ApiError> {
    let status = state.coordinator.status().await.ok_or_else(coordinator_gone)?;
    Ok(Json(status.presence))
}

async fn get_performance(State(state): State<AppStateArc>) -> Json<PerformanceSnapshot> {
    Json(state.inference.performance())
}

// ============================================================================
// Cleaning Routes
// ============================================================================

pub fn cleaning_routes() -> Router<AppStateArc> {
    Router::new().route("/api/clean", post(manual_clean))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanAccepted {
    pub accepted: bool,
}

async fn manual_clean(
    State(state): State<AppStateArc>,
) -> Result<(StatusCode, Json<CleanAccepted>), ApiError> {
    info!("  Manual clean requested");
    match state.coordinator.manual_clean().await {
        Ok(()) => Ok((StatusCode::ACCEPTED, Json(CleanAccepted { accepted: true }))),
        Err(e) => Err(api_error(cleaning_status(&e), e.code(), &e)),
    }
}

fn cleaning_status(err: &CleaningError) -> StatusCode {
    match err {
        CleaningError::CoordinatorStopped => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::CONFLICT,
    }
}

// ============================================================================
// Capture Routes
// ============================================================================

pub fn capture_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/capture", get(capture_now))
        .route("/api/photo", get(last_photo))
}

fn cycle_status(err: &CycleError) -> StatusCode {
    match err {
        CycleError::Capture(CaptureError::RateLimited { .. })
        | CycleError::Inference(InferenceError::Busy) => StatusCode::TOO_MANY_REQUESTS,
        CycleError::Capture(CaptureError::NoBackend)
        | CycleError::Inference(InferenceError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn capture_now(State(state): State<AppStateArc>) -> Result<Json<InferenceVerdict>, ApiError> {
    info!("  Capture requested");
    state.coordinator.capture_now().await.map(Json).map_err(|e| {
        warn!("  Capture request failed: {}", e);
        api_error(cycle_status(&e), e.code(), &e)
    })
}

async fn last_photo(State(state): State<AppStateArc>) -> Result<Response, ApiError> {
    let photo = state
        .capture
        .last_photo()
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "no_photo", "no photo captured yet"))?;
    Ok((
        [(header::CONTENT_TYPE, "image/jpeg")],
        photo.bytes.to_vec(),
    )
        .into_response())
}

// ============================================================================
// Config Routes
// ============================================================================

pub fn config_routes() -> Router<AppStateArc> {
    Router::new().route("/api/config", post(update_config))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigUpdate {
    pub test_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigUpdated {
    pub test_interval_ms: u64,
}

async fn update_config(
    State(state): State<AppStateArc>,
    Json(req): Json<ConfigUpdate>,
) -> Result<Json<ConfigUpdated>, ApiError> {
    let result = match &state.test_signal {
        Some(signal) => signal.set_period(Duration::from_millis(req.test_interval_ms)),
        None => Err(ConfigUpdateError::NoTestSignal),
    };
    match result {
        Ok(()) => Ok(Json(ConfigUpdated {
            test_interval_ms: req.test_interval_ms,
        })),
        Err(e @ ConfigUpdateError::IntervalTooShort { .. }) => {
            Err(api_error(StatusCode::BAD_REQUEST, e.code(), &e))
        }
        Err(e @ ConfigUpdateError::NoTestSignal) => {
            Err(api_error(StatusCode::CONFLICT, e.code(), &e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_status_mapping() {
        let cases = [
            (
                CycleError::from(CaptureError::RateLimited { retry_after_ms: 1 }),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (InferenceError::Busy.into(), StatusCode::TOO_MANY_REQUESTS),
            (CaptureError::NoBackend.into(), StatusCode::SERVICE_UNAVAILABLE),
            (InferenceError::NotReady.into(), StatusCode::SERVICE_UNAVAILABLE),
            (
                CaptureError::DeviceError("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                InferenceError::BadImage("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                InferenceError::Prediction("x".into()).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(cycle_status(&err), expected, "{:?}", err);
        }
    }

    #[test]
    fn test_cleaning_status_mapping() {
        assert_eq!(
            cleaning_status(&CleaningError::AlreadyCleaning),
            StatusCode::CONFLICT
        );
        assert_eq!(
            cleaning_status(&CleaningError::CoordinatorStopped),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
