// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface for the stages.
//!
//! Every stage is served at its own path. A request carrying `x-async: true`
//! is decoded, acknowledged with `202 Accepted` and processed on a spawned
//! task; without the header the stage runs inline and its outcome is
//! returned. Failures use `{"error": {"kind", "message"}}`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;

use crate::application::error::{ErrorKind, StageError};
use crate::application::negotiation::NegotiationWorkflow;
use crate::application::stages::StageHandlers;
use crate::domain::dispatch::{StageId, ASYNC_HEADER};
use crate::domain::envelope::{Envelope, EnvelopeError};
use crate::infrastructure::release_log::InProcessReleaseLog;

pub struct AppState {
    pub handlers: Arc<StageHandlers>,
    pub workflow: Arc<NegotiationWorkflow>,
    pub release_log: InProcessReleaseLog,
}

pub fn app(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/negotiate", post(negotiate))
        .route("/releases/{topic}", get(read_releases));

    for stage in StageId::ALL {
        router = router.route(
            stage.path(),
            post(move |state: State<Arc<AppState>>, headers: HeaderMap, body: Bytes| {
                handle_stage(stage, state, headers, body)
            }),
        );
    }

    router.with_state(state)
}

/// Stage failure rendered as an HTTP response.
pub struct ApiError(pub StageError);

impl ApiError {
    pub fn status(kind: ErrorKind) -> StatusCode {
        match kind {
            ErrorKind::MalformedInput => StatusCode::BAD_REQUEST,
            ErrorKind::InvalidMetadata => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::ProtocolViolation => StatusCode::CONFLICT,
            ErrorKind::IterationExhausted => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StageError> for ApiError {
    fn from(err: StageError) -> Self {
        Self(err)
    }
}

impl From<EnvelopeError> for ApiError {
    fn from(err: EnvelopeError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let body = json!({
            "error": {
                "kind": kind.as_str(),
                "message": self.0.to_string(),
            }
        });
        (Self::status(kind), Json(body)).into_response()
    }
}

fn wants_async(headers: &HeaderMap) -> bool {
    headers
        .get(ASYNC_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

async fn handle_stage(
    stage: StageId,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let envelope = Envelope::from_json(&body)?;

    if wants_async(&headers) {
        let handlers = state.handlers.clone();
        tokio::spawn(async move {
            // failures are logged by the handler; the caller already has its 202
            let _ = handlers.handle(stage, envelope).await;
        });
        let body = json!({ "stage": stage, "status": "accepted" });
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    let outcome = state.handlers.handle(stage, envelope).await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

async fn negotiate(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Response, ApiError> {
    let envelope = Envelope::from_json(&body)?;
    let workflow = state.workflow.clone();
    // the whole cycle runs synchronously; keep it off the async workers
    let report = tokio::task::spawn_blocking(move || workflow.run(envelope))
        .await
        .map_err(|e| StageError::Worker(format!("negotiation task failed: {e}")))??;
    Ok(Json(report).into_response())
}

async fn read_releases(
    State(state): State<Arc<AppState>>,
    Path(topic): Path<String>,
) -> impl IntoResponse {
    Json(json!({
        "topic": topic,
        "messages": state.release_log.read(&topic),
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
