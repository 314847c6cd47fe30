// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentListQuery, CancelAppointmentRequest, CreateAppointmentRequest,
    RescheduleAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::booking::AppointmentBookingService;

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let service = AppointmentBookingService::new(&state);
    let created = service.create(request).await.map_err(map_appointment_error)?;
    Ok((StatusCode::CREATED, Json(json!(created))))
}

#[axum::debug_handler]
pub async fn list_appointments(
    State(state): State<Arc<AppConfig>>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointments = service.list(&query).await.map_err(map_appointment_error)?;
    let tz = service.listing_timezone(&query).await;
    let total = appointments.len();
    Ok(Json(json!({
        "appointments": appointments,
        "total": total,
        "tz": tz,
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service
        .get(appointment_id)
        .await
        .map_err(map_appointment_error)?;
    Ok(Json(json!(appointment)))
}

/// State-machine events plus note and reason edits share the single PUT.
#[axum::debug_handler]
pub async fn update_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service
        .update(appointment_id, request)
        .await
        .map_err(map_appointment_error)?;
    Ok(Json(json!(appointment)))
}

/// Logical cancel; the row is kept, status moves to cancelled.
#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let service = AppointmentBookingService::new(&state);
    let appointment = service
        .cancel(appointment_id, request)
        .await
        .map_err(map_appointment_error)?;
    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let service = AppointmentBookingService::new(&state);
    let created = service
        .reschedule(appointment_id, request)
        .await
        .map_err(map_appointment_error)?;
    Ok((StatusCode::CREATED, Json(json!(created))))
}

pub(crate) fn map_appointment_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
        AppointmentError::DoctorNotFound => AppError::NotFound("Doctor not found".to_string()),
        AppointmentError::OfficeNotFound => AppError::NotFound("Office not found".to_string()),
        AppointmentError::IllegalTransition { from, event } => AppError::IllegalTransition(
            format!("Event '{}' is not allowed in status '{}'", event, from),
        ),
        AppointmentError::OverlapConflict => AppError::OverlapConflict(
            "The requested time overlaps an existing appointment".to_string(),
        ),
        AppointmentError::SlotNotAvailable => AppError::SlotNotAvailable(
            "The requested start is not a bookable slot".to_string(),
        ),
        AppointmentError::LicenseExpired => {
            AppError::LicenseExpired("Doctor license is expired".to_string())
        }
        AppointmentError::ValidationFailed(details) => AppError::ValidationFailed(details),
        AppointmentError::Conflict => {
            AppError::Conflict("Concurrent modification, please retry".to_string())
        }
        AppointmentError::Availability(e) => {
            use availability_cell::models::AvailabilityError;
            match e {
                AvailabilityError::TemplateInvariantViolated(msg) => {
                    AppError::TemplateInvariantViolated(msg)
                }
                AvailabilityError::TimezoneUnknown(tz) => AppError::TimezoneUnknown(tz),
                AvailabilityError::RangeTooLarge(msg) => AppError::RangeTooLarge(msg),
                AvailabilityError::DoctorNotFound => {
                    AppError::NotFound("Doctor not found".to_string())
                }
                AvailabilityError::InvalidQuery(msg) => AppError::ValidationFailed(
                    [("query".to_string(), json!(msg))].into_iter().collect(),
                ),
                AvailabilityError::DatabaseError(msg) => AppError::Internal(msg),
            }
        }
        AppointmentError::DatabaseError(msg) => AppError::Internal(msg),
    }
}
