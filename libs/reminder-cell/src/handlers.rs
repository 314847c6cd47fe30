// libs/reminder-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use availability_cell::services::clock::SystemClock;
use shared_config::AppConfig;
use shared_database::StoreClient;
use shared_models::error::AppError;

use crate::models::{ReminderError, UpdateReminderRequest};
use crate::services::dispatcher::ReminderDispatcherService;
use crate::services::messaging::WhatsAppClient;
use crate::services::policy::ReminderPolicyService;

/// One dispatch tick, triggered by the external cron through the internal
/// router. Always answers 200 with the outcome counters; per-reminder
/// failures are counted, not surfaced as an error.
#[axum::debug_handler]
pub async fn trigger_reminders(
    State(state): State<Arc<AppConfig>>,
) -> Result<Json<Value>, AppError> {
    let store = Arc::new(StoreClient::new(&state));
    let messaging = Arc::new(WhatsAppClient::new(&state));
    let clock = Arc::new(SystemClock);
    let dispatcher = ReminderDispatcherService::new(&state, store, messaging, clock);

    let report = dispatcher.run_tick().await.map_err(map_reminder_error)?;

    Ok(Json(json!({
        "status": "completed",
        "report": report,
    })))
}

#[axum::debug_handler]
pub async fn list_appointment_reminders(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let service = ReminderPolicyService::new(Arc::new(StoreClient::new(&state)));

    let reminders = service
        .list_for_appointment(appointment_id)
        .await
        .map_err(map_reminder_error)?;

    Ok(Json(json!({ "reminders": reminders })))
}

#[axum::debug_handler]
pub async fn update_appointment_reminder(
    State(state): State<Arc<AppConfig>>,
    Path((appointment_id, ordinal)): Path<(Uuid, i32)>,
    Json(request): Json<UpdateReminderRequest>,
) -> Result<Json<Value>, AppError> {
    let service = ReminderPolicyService::new(Arc::new(StoreClient::new(&state)));

    let reminder = service
        .update_reminder(appointment_id, ordinal, request)
        .await
        .map_err(map_reminder_error)?;

    Ok(Json(json!(reminder)))
}

pub(crate) fn map_reminder_error(e: ReminderError) -> AppError {
    match e {
        ReminderError::NotFound => AppError::NotFound("Reminder not found".to_string()),
        ReminderError::Immutable => {
            AppError::ReminderImmutable("Reminder has already been sent".to_string())
        }
        ReminderError::AppointmentNotEditable(status) => AppError::Conflict(format!(
            "Appointment in status '{}' no longer accepts reminder edits",
            status
        )),
        ReminderError::ValidationFailed(details) => AppError::ValidationFailed(details),
        ReminderError::MessagingFailed(msg) => AppError::MessagingFailed(msg),
        ReminderError::DatabaseError(msg) => AppError::Internal(msg),
    }
}
