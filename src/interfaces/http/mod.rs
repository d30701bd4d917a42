//! JSON API for the web configurator and the operator dashboard.

pub mod handlers;
pub mod models;

use crate::application::engine::EngineSettings;
use crate::domain::ports::{CredentialCipher, OrderStore, PayloadReferenceStore};
use crate::error::IntakeError;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Everything the API handlers need, shared across requests.
#[derive(Clone)]
pub struct ApiState {
    pub orders: Arc<dyn OrderStore>,
    pub references: Arc<dyn PayloadReferenceStore>,
    pub cipher: Arc<dyn CredentialCipher>,
    pub settings: Arc<ApiSettings>,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub intake: EngineSettings,
    /// When set, every request must carry `Authorization: Bearer <token>`.
    pub api_token: Option<String>,
    pub payload_retention: chrono::Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            intake: EngineSettings::default(),
            api_token: None,
            payload_retention: chrono::Duration::hours(72),
        }
    }
}

/// Error body `{"error": code, "message": text}` with a matching status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<IntakeError> for ApiError {
    fn from(err: IntakeError) -> Self {
        let (status, code) = match &err {
            IntakeError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_field"),
            IntakeError::MalformedPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            IntakeError::SignatureInvalid => (StatusCode::BAD_REQUEST, "signature_invalid"),
            IntakeError::NotFound(_) | IntakeError::ReferenceNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            IntakeError::InvalidTransition { .. } | IntakeError::DuplicateSubmission(_) => {
                (StatusCode::CONFLICT, "conflict")
            }
            _ => {
                error!(error = %err, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

fn constant_time_eq(left: &str, right: &str) -> bool {
    let left = left.as_bytes();
    let right = right.as_bytes();
    if left.len() != right.len() {
        return false;
    }
    let mut diff = 0_u8;
    for (a, b) in left.iter().zip(right) {
        diff |= a ^ b;
    }
    diff == 0
}

async fn require_token(State(state): State<ApiState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.settings.api_token.as_deref() else {
        return next.run(request).await;
    };
    if request.method() == axum::http::Method::OPTIONS {
        return next.run(request).await;
    }
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| constant_time_eq(token.trim(), expected));
    if authorized {
        next.run(request).await
    } else {
        ApiError {
            status: StatusCode::UNAUTHORIZED,
            code: "unauthorized",
            message: "missing or invalid bearer token".to_string(),
        }
        .into_response()
    }
}

/// Builds the API router.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/api/drafts", post(handlers::create_draft))
        .route("/api/drafts/:token", get(handlers::get_draft))
        .route("/api/orders", get(handlers::list_orders))
        .route(
            "/api/orders/:id",
            get(handlers::get_order).patch(handlers::update_order),
        )
        .route("/api/stats", get(handlers::stats))
        .route("/api/payloads", post(handlers::create_payload))
        .route(
            "/api/payloads/:token",
            axum::routing::delete(handlers::delete_payload),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
