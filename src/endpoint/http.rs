//! Agent 协议的 HTTP 绑定（axum）
//!
//! - POST /runs                -> 202 {run_id}
//! - GET  /runs/:id            -> 运行状态
//! - GET  /runs/:id/result     -> 200 FinalAnswer | 409 未结束 | 422 run 失败
//! - POST /runs/:id/cancel     -> {cancelled}
//! - GET  /.well-known/agent.json, GET /health

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::endpoint::{AgentCard, AgentEndpoint, EndpointError, SubmitRequest};

pub struct HttpState {
    pub endpoint: AgentEndpoint,
    pub card: AgentCard,
}

impl IntoResponse for EndpointError {
    fn into_response(self) -> Response {
        let status = match &self {
            EndpointError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            EndpointError::NotFound(_) => StatusCode::NOT_FOUND,
            EndpointError::NotFinished { .. } => StatusCode::CONFLICT,
            EndpointError::RunFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EndpointError::Dispatch(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            EndpointError::Dispatch(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({
            "error": self.to_string(),
            "retryable": self.retryable(),
        }));
        (status, body).into_response()
    }
}

pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/agent.json", get(agent_card))
        .route("/runs", post(submit))
        .route("/runs/:id", get(status))
        .route("/runs/:id/result", get(result))
        .route("/runs/:id/cancel", post(cancel))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn agent_card(State(state): State<Arc<HttpState>>) -> Json<AgentCard> {
    Json(state.card.clone())
}

async fn submit(
    State(state): State<Arc<HttpState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), EndpointError> {
    let response = state.endpoint.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "run_id": response.run_id }))))
}

async fn status(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    match state.endpoint.get_status(&id).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn result(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    match state.endpoint.get_result(&id).await {
        Ok(answer) => Json(answer).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn cancel(State(state): State<Arc<HttpState>>, Path(id): Path<String>) -> Response {
    match state.endpoint.cancel(&id).await {
        Ok(cancelled) => Json(json!({ "cancelled": cancelled })).into_response(),
        Err(e) => e.into_response(),
    }
}
