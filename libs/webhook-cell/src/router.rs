// libs/webhook-cell/src/router.rs
use std::sync::Arc;

use axum::{routing::post, Router};

use shared_config::AppConfig;

use crate::handlers;

pub fn webhook_routes(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/messaging", post(handlers::receive_messaging_webhook))
        .with_state(state)
}
