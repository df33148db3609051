mod routes;

pub use routes::create_router;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use noema_core::{Engine, NoemaError, ReasonCode};
use serde::Serialize;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            start_time: std::time::Instant::now(),
        }
    }
}

/// JSON response wrapper
#[derive(Serialize)]
pub struct JsonResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
}

impl<T: Serialize> JsonResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            reason: None,
        }
    }
}

impl JsonResponse<()> {
    pub fn err(msg: impl Into<String>, reason: Option<ReasonCode>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
            reason,
        }
    }
}

/// Error type for HTTP handlers. Engine errors keep their reason code and
/// map to a matching status.
pub struct AppError(anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(NoemaError::Validation(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let engine_error = self.0.downcast_ref::<NoemaError>();
        let status = match engine_error {
            Some(NoemaError::Validation(_)) => StatusCode::BAD_REQUEST,
            Some(NoemaError::FactNotFound(_) | NoemaError::EntityNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            Some(NoemaError::Consistency { .. }) => StatusCode::CONFLICT,
            Some(NoemaError::ProviderUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let reason = engine_error.map(|e| e.reason_code());
        (status, Json(JsonResponse::err(self.0.to_string(), reason))).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

pub type AppResult<T> = Result<T, AppError>;
