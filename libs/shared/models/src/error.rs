use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Illegal transition: {0}")]
    IllegalTransition(String),

    #[error("Overlap conflict: {0}")]
    OverlapConflict(String),

    #[error("Slot not available: {0}")]
    SlotNotAvailable(String),

    #[error("Template invariant violated: {0}")]
    TemplateInvariantViolated(String),

    #[error("License expired: {0}")]
    LicenseExpired(String),

    #[error("Reminder immutable: {0}")]
    ReminderImmutable(String),

    #[error("Validation failed")]
    ValidationFailed(Map<String, Value>),

    #[error("Range too large: {0}")]
    RangeTooLarge(String),

    #[error("Unknown timezone: {0}")]
    TimezoneUnknown(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Integrity violated: {0}")]
    IntegrityViolated(String),

    #[error("Messaging failed: {0}")]
    MessagingFailed(String),

    #[error("Calendar mirror failed: {0}")]
    CalendarMirrorFailed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::IllegalTransition(_) => "illegal_transition",
            AppError::OverlapConflict(_) => "overlap_conflict",
            AppError::SlotNotAvailable(_) => "slot_not_available",
            AppError::TemplateInvariantViolated(_) => "template_invariant_violated",
            AppError::LicenseExpired(_) => "license_expired",
            AppError::ReminderImmutable(_) => "reminder_immutable",
            AppError::ValidationFailed(_) => "validation_failed",
            AppError::RangeTooLarge(_) => "range_too_large",
            AppError::TimezoneUnknown(_) => "timezone_unknown",
            AppError::Conflict(_) => "conflict",
            AppError::Unavailable(_) => "storage_unavailable",
            AppError::IntegrityViolated(_) => "integrity_violated",
            AppError::MessagingFailed(_) => "messaging_failed",
            AppError::CalendarMirrorFailed(_) => "calendar_mirror_failed",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::NotFound(_) => "not_found",
            AppError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::IllegalTransition(_)
            | AppError::SlotNotAvailable(_)
            | AppError::TemplateInvariantViolated(_)
            | AppError::LicenseExpired(_)
            | AppError::ReminderImmutable(_)
            | AppError::ValidationFailed(_)
            | AppError::RangeTooLarge(_)
            | AppError::TimezoneUnknown(_) => StatusCode::BAD_REQUEST,
            AppError::OverlapConflict(_) | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::IntegrityViolated(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::MessagingFailed(_) | AppError::CalendarMirrorFailed(_) => {
                StatusCode::BAD_GATEWAY
            }
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        tracing::error!("Error: {}: {}", status, message);

        let body = match &self {
            AppError::ValidationFailed(fields) => Json(json!({
                "error": self.code(),
                "message": "Validation failed",
                "details": fields,
            })),
            _ => Json(json!({
                "error": self.code(),
                "message": message,
            })),
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_4xx() {
        assert_eq!(
            AppError::IllegalTransition("confirmed -> pending".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::OverlapConflict("doctor busy".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Unavailable("store down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AppError::LicenseExpired(String::new()).code(), "license_expired");
        assert_eq!(
            AppError::ValidationFailed(Map::new()).code(),
            "validation_failed"
        );
    }
}
