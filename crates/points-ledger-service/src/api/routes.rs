//! 路由配置

use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use points_shared::observability::middleware::{http_tracing, request_id};
use tower_http::timeout::TimeoutLayer;

use super::handlers;
use super::state::AppState;

/// 通行证与出席路由
fn pass_routes() -> Router<AppState> {
    Router::new()
        .route("/passes", post(handlers::open_pass))
        .route("/passes/{id}", get(handlers::get_pass))
        .route("/passes/{id}/movements", get(handlers::list_movements))
        .route("/passes/{id}/close", post(handlers::close_pass))
        .route("/passes/{id}/reopen", post(handlers::reopen_pass))
        .route("/passes/{id}/attendance", post(handlers::record_attendance))
}

/// 兑换路由
fn exchange_routes() -> Router<AppState> {
    Router::new()
        .route("/exchanges", post(handlers::request_exchange))
        .route("/exchanges/{attempt_id}", get(handlers::exchange_status))
        .route("/passes/{id}/exchanges", get(handlers::list_exchange_records))
}

/// 运维路由
fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/reconcile", post(handlers::reconcile))
        .route("/admin/dead-letters", get(handlers::list_dead_letters))
        .route(
            "/admin/dead-letters/replay",
            post(handlers::replay_dead_letters),
        )
        .route("/admin/items", post(handlers::create_item))
}

/// 构建完整的 HTTP 路由
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let api = Router::new()
        .merge(pass_routes())
        .merge(exchange_routes())
        .merge(admin_routes());

    Router::new()
        .nest("/api", api)
        .route("/health", get(|| async { "OK" }))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(http_tracing))
        .layer(middleware::from_fn(request_id))
        .with_state(state)
}
