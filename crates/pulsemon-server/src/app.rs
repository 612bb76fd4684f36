use crate::state::AppState;
use crate::{handlers, middleware as mw};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

/// Assembles the router. Layers added last run first, so the chain reads
/// bottom-up: strip trailing slash, decrypt, verify hash, decompress, log,
/// compress, trusted subnet, then the handlers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/update/{mtype}/{name}/{value}", post(handlers::update_metric))
        .route("/update", post(handlers::update_metric_json))
        .route("/updates", post(handlers::update_metrics_batch))
        .route("/value/{mtype}/{name}", get(handlers::get_metric))
        .route("/value", post(handlers::get_metric_json))
        .route("/", get(handlers::list_metrics))
        .route("/ping", get(handlers::ping))
        .layer(from_fn_with_state(state.clone(), mw::trusted_subnet))
        .layer(from_fn(mw::compress))
        .layer(from_fn(mw::log_requests))
        .layer(from_fn(mw::decompress))
        .layer(from_fn_with_state(state.clone(), mw::verify_hash))
        .layer(from_fn_with_state(state.clone(), mw::decrypt))
        .layer(from_fn(mw::strip_trailing_slash))
        .with_state(state)
}
