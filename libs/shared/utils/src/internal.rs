use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};

use shared_config::AppConfig;
use shared_models::error::AppError;

/// Middleware guarding internal trigger endpoints with the shared secret
/// header. The external cron is the only expected caller.
pub async fn internal_key_middleware(
    State(config): State<Arc<AppConfig>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let provided = request
        .headers()
        .get("X-Internal-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing X-Internal-Key header".to_string()))?;

    if config.internal_api_key.is_empty() {
        return Err(AppError::Unauthorized(
            "Internal API key not configured".to_string(),
        ));
    }

    if !constant_time_eq(provided.as_bytes(), config.internal_api_key.as_bytes()) {
        return Err(AppError::Unauthorized("Invalid internal key".to_string()));
    }

    Ok(next.run(request).await)
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secre7"));
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }
}
