use std::sync::Arc;

use axum::{routing::get, Router};

use appointment_cell::router::appointment_routes;
use availability_cell::router::availability_routes;
use reminder_cell::router::internal_routes;
use shared_config::AppConfig;
use webhook_cell::router::webhook_routes;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic core API is running" }))
        .nest("/appointments", appointment_routes(state.clone()))
        .nest("/availability", availability_routes(state.clone()))
        .nest("/webhooks", webhook_routes(state.clone()))
        .nest("/internal", internal_routes(state))
}
