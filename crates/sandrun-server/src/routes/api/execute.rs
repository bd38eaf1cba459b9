use std::time::Instant;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sandrun::{Credentials, ExecutionResult, RunConfig, ScriptSource};

use super::{
    error::HttpApiError,
    types::{ExecuteRequest, StagedExecuteRequest},
};
use crate::routes::AppState;

#[tracing::instrument(target = "sandrun_server::script", skip_all, fields(transport = "inline"))]
pub async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Result<Response, HttpApiError> {
    let Json(req) = payload?;
    let source = ScriptSource::from_json(&req.source)
        .map_err(|e| HttpApiError::invalid_request(e.to_string()))?;
    if matches!(source, ScriptSource::FilePath(_)) {
        return Err(HttpApiError::invalid_request(
            "file sources can only be run through /api/scripts/{name}/execute",
        ));
    }
    run(&state, &source, &req.credentials, &req.config).await
}

#[tracing::instrument(target = "sandrun_server::script", skip(state, body), fields(transport = "staged"))]
pub async fn execute_staged(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response, HttpApiError> {
    let req: StagedExecuteRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StagedExecuteRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| HttpApiError::invalid_request(format!("invalid request body: {e}")))?
    };
    let path = state.store.path(&name).await?;
    run(&state, &ScriptSource::file(path), &req.credentials, &req.config).await
}

async fn run(
    state: &AppState,
    source: &ScriptSource,
    credentials: &Credentials,
    config: &RunConfig,
) -> Result<Response, HttpApiError> {
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|_| HttpApiError::internal("server is shutting down"))?;

    let started = Instant::now();
    let result = state.engine.run(source, credentials, config).await;
    record_metrics(&result, started);

    let status = if result.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)).into_response())
}

fn record_metrics(result: &ExecutionResult, started: Instant) {
    let outcome = if result.success {
        "success".to_string()
    } else {
        result.error_kind().unwrap_or("GuestFailure").to_string()
    };
    metrics::counter!("sandrun_runs_total", "outcome" => outcome).increment(1);
    metrics::histogram!("sandrun_run_duration_seconds").record(started.elapsed().as_secs_f64());
}
