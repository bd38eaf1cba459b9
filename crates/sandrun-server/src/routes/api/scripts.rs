use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};

use super::{error::HttpApiError, types::UploadRequest};
use crate::{routes::AppState, store::ScriptInfo};

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ScriptInfo>>, HttpApiError> {
    Ok(Json(state.store.list().await?))
}

pub async fn upload(
    State(state): State<AppState>,
    payload: Result<Json<UploadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ScriptInfo>), HttpApiError> {
    let Json(req) = payload?;
    if req.code.trim().is_empty() {
        return Err(HttpApiError::invalid_request("code must not be empty"));
    }
    let info = state.store.save(&req.name, &req.code).await?;
    tracing::info!(script = %info.name, size = info.size, "staged script");
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, HttpApiError> {
    state.store.delete(&name).await?;
    tracing::info!(script = %name, "removed staged script");
    Ok(StatusCode::NO_CONTENT)
}
