pub mod admin;
pub mod engines;
pub mod health;
pub mod queue;
pub mod submit;
pub mod tasks;

use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::ApiState;

pub fn build_router(state: ApiState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    Router::new()
        .route("/api/v1/tasks/submit", post(submit::submit))
        .route(
            "/api/v1/tasks/{id}",
            get(tasks::get_task).delete(tasks::cancel_task),
        )
        .route("/api/v1/queue/tasks", get(queue::list_tasks))
        .route("/api/v1/queue/stats", get(queue::stats))
        .route("/api/v1/admin/cleanup", post(admin::cleanup))
        .route("/api/v1/admin/reset-stale", post(admin::reset_stale))
        .route("/api/v1/engines", get(engines::catalog))
        .route("/api/v1/health", get(health::health))
        .layer(middleware)
        .with_state(state)
}
