use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tracing::{error, info};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;
use crate::error::{DispatchError, InsightError};
use crate::insights::{parse_period, InsightAggregator, InsightReport, DEFAULT_WINDOW_DAYS};
use crate::types::{AttemptId, AttemptQuery, DeliveryAttempt, EventPayload};

/// Shared handles for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub insights: Arc<InsightAggregator>,
}

/// Errors surfaced by the HTTP API, rendered as `{ "error": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Insight(#[from] InsightError),

    #[error("{0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            // The dispatch trigger reports every rejected call as a 500.
            ApiError::Dispatch(DispatchError::Validation(_))
            | ApiError::Dispatch(DispatchError::Dependency(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Dispatch(DispatchError::UnknownAttempt(_)) => StatusCode::NOT_FOUND,
            ApiError::Dispatch(DispatchError::InactiveSubscription(_)) => StatusCode::CONFLICT,
            ApiError::Insight(InsightError::InvalidPeriod(_)) | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Insight(InsightError::Dependency(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            error!("request failed: {self}");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/dispatch", post(dispatch))
        .route("/insights", post(insights))
        .route("/deliveries", get(list_deliveries))
        .route("/deliveries/{id}/replay", post(replay_delivery))
        .with_state(state)
}

/// Serve the API on an already-bound listener until the task is dropped.
pub async fn run(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "webhook relay listening");
    }
    axum::serve(listener, router(state)).await
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub message: String,
}

async fn dispatch(
    State(state): State<AppState>,
    body: Result<Json<Map<String, Value>>, axum::extract::rejection::JsonRejection>,
) -> ApiResult<DispatchResponse> {
    let Json(body) = body.map_err(|e| DispatchError::Validation(e.body_text()))?;
    let payload = EventPayload::from_object(body)?;
    let summary = state.dispatcher.dispatch(&payload).await?;

    Ok(Json(DispatchResponse {
        message: format!(
            "event {} dispatched to {} subscription(s)",
            summary.event, summary.deliveries
        ),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct InsightRequest {
    pub period: Option<String>,
}

async fn insights(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<InsightReport> {
    let request: InsightRequest = if body.iter().all(u8::is_ascii_whitespace) {
        InsightRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))?
    };
    let days = match request.period.as_deref() {
        Some(period) => parse_period(period)?,
        None => DEFAULT_WINDOW_DAYS,
    };
    Ok(Json(state.insights.insights(days).await?))
}

async fn list_deliveries(
    State(state): State<AppState>,
    Query(query): Query<AttemptQuery>,
) -> ApiResult<Vec<DeliveryAttempt>> {
    let attempts = state
        .dispatcher
        .delivery_log()
        .attempts(&query)
        .await
        .map_err(DispatchError::from)?;
    Ok(Json(attempts))
}

async fn replay_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<DeliveryAttempt> {
    let id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid attempt id {id:?}")))?;
    Ok(Json(state.dispatcher.replay(&AttemptId(id)).await?))
}
