mod error;
mod execute;
mod scripts;
pub mod types;

use axum::{
    Router,
    routing::{delete, get, post},
};

use super::AppState;

pub fn router(state: &AppState) -> Router {
    Router::new()
        .route("/execute", post(execute::execute))
        .route("/scripts", get(scripts::list).post(scripts::upload))
        .route("/scripts/{name}", delete(scripts::delete))
        .route("/scripts/{name}/execute", post(execute::execute_staged))
        .with_state(state.clone())
}
