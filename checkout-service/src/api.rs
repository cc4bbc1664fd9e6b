use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::CheckoutError;
use crate::orchestrator::CheckoutOrchestrator;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CheckoutOrchestrator>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub stage: CheckoutStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
}

impl From<&CheckoutError> for ErrorResponse {
    fn from(err: &CheckoutError) -> Self {
        Self {
            error: err.to_string(),
            stage: err.stage(),
            order_id: err.orphaned_order(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

fn status_for(err: &CheckoutError) -> StatusCode {
    match err {
        CheckoutError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CheckoutError::ProductNotFound(_) | CheckoutError::Pricing(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CheckoutError::InProgress(_) => StatusCode::CONFLICT,
        CheckoutError::Catalog(_)
        | CheckoutError::Idempotency(_)
        | CheckoutError::OrderHeaderWrite(_)
        | CheckoutError::OrderItemsWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn checkout(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutOutcome>, (StatusCode, Json<ErrorResponse>)> {
    match state.orchestrator.place_order(request).await {
        Ok(outcome) => {
            tracing::info!(order_id = %outcome.order_id, stage = %outcome.stage, replayed = outcome.replayed, "Checkout handled");
            Ok(Json(outcome))
        }
        Err(e) => Err((status_for(&e), Json(ErrorResponse::from(&e)))),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
