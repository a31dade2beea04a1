use crate::snapshot::SnapshotCache;
use axum::{
    extract::{Request, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::Level;

pub fn create_router(cache: SnapshotCache, path: &str) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(path, get(latest_reading))
        .with_state(cache)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::span!(
                        Level::INFO,
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(|_request: &Request, _span: &tracing::Span| {
                    tracing::event!(Level::DEBUG, "received request");
                }),
        )
}

/// Serves the cached JSON verbatim; never fails, even before the first cycle.
pub async fn latest_reading(State(cache): State<SnapshotCache>) -> impl IntoResponse {
    let snapshot = cache.current();
    (
        [(header::CONTENT_TYPE, "application/json")],
        snapshot.json.clone(),
    )
}

/// Health check endpoint handler
pub async fn health() -> &'static str {
    "OK"
}
