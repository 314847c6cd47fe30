// libs/availability-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::Value;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{AvailabilityError, AvailabilityQuery};
use crate::services::slots::AvailabilityService;

#[axum::debug_handler]
pub async fn get_availability(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AvailabilityService::new(&state);

    let response = service
        .get_available_slots(&query)
        .await
        .map_err(map_availability_error)?;

    Ok(Json(serde_json::json!(response)))
}

pub(crate) fn map_availability_error(e: AvailabilityError) -> AppError {
    match e {
        AvailabilityError::TemplateInvariantViolated(msg) => {
            AppError::TemplateInvariantViolated(msg)
        }
        AvailabilityError::TimezoneUnknown(tz) => AppError::TimezoneUnknown(tz),
        AvailabilityError::RangeTooLarge(msg) => AppError::RangeTooLarge(msg),
        AvailabilityError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        AvailabilityError::InvalidQuery(msg) => AppError::ValidationFailed(
            [("query".to_string(), serde_json::json!(msg))]
                .into_iter()
                .collect(),
        ),
        AvailabilityError::DatabaseError(msg) => AppError::Internal(msg),
    }
}
