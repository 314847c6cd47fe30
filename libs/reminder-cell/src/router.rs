// libs/reminder-cell/src/router.rs
use std::sync::Arc;

use axum::{middleware, routing::post, Router};

use shared_config::AppConfig;
use shared_utils::internal::internal_key_middleware;

use crate::handlers;

/// Internal routes for the cron trigger. Guarded by the shared-secret
/// header, never exposed to end users.
pub fn internal_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/trigger-reminders", post(handlers::trigger_reminders))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            internal_key_middleware,
        ))
        .with_state(state)
}
