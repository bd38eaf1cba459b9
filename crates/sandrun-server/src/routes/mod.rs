pub mod api;
mod state;

use std::{future::ready, time::Duration};

use axum::{
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::Response,
    routing::get,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
pub use state::AppState;
use tower_http::trace::TraceLayer;

/// Install the process-wide metrics recorder and keep its histograms
/// trimmed.
pub fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    let prometheus = PrometheusBuilder::new().install_recorder()?;
    let m = prometheus.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            m.run_upkeep();
        }
    });
    Ok(prometheus)
}

pub fn router(state: &AppState, prometheus: PrometheusHandle) -> axum::Router {
    axum::Router::new()
        .route("/debug/healthz", get(|| ready(StatusCode::NO_CONTENT)))
        .route(
            "/debug/metrics",
            get(move || {
                let mut resp = Response::new(prometheus.render());
                resp.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                ready(resp)
            }),
        )
        .nest("/api", api::router(state))
        .layer(TraceLayer::new_for_http())
}
