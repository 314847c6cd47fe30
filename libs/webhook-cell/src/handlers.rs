// libs/webhook-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::WebhookError;
use crate::services::ingest::WebhookIngestService;

/// Signature verification needs the raw bytes, so the body is taken
/// unparsed and decoded inside the service.
#[axum::debug_handler]
pub async fn receive_messaging_webhook(
    State(state): State<Arc<AppConfig>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get("X-Hub-Signature-256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let service = WebhookIngestService::new(&state);
    match service.ingest(&body, signature).await {
        Ok(report) => Ok(Json(json!({ "status": "processed", "report": report }))),
        Err(WebhookError::InvalidSignature) => Err(AppError::Unauthorized(
            "Webhook signature verification failed".to_string(),
        )),
        // The provider retries 4xx/5xx; an unparseable or failing payload
        // gets a 200 so it is not redelivered forever.
        Err(e) => {
            tracing::warn!("Webhook processing error answered 200: {}", e);
            Ok(Json(json!({ "status": "ignored", "error": e.to_string() })))
        }
    }
}
