// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use reminder_cell::models::ReminderSpec;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub office_id: Uuid,
    /// Catalog key of the appointment type ("consulta", "seguimiento", ...).
    /// The catalog itself lives with the profile collaborator.
    pub appointment_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub cancellation_reason: Option<String>,
    /// Legacy single-flag reminder scheme. Appointments migrated from the
    /// old system carry it instead of reminder rows; the dispatcher honors
    /// both.
    pub auto_reminder_enabled: bool,
    pub auto_reminder_offset_minutes: Option<i64>,
    pub reminder_sent: bool,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_by: CreatedBy,
    /// Bumped on every committed transition; feeds the calendar mirror
    /// idempotency key.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Appointment {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            AppointmentStatus::Cancelled
                | AppointmentStatus::Completed
                | AppointmentStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingConfirmation,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::PendingConfirmation => write!(f, "pending_confirmation"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CreatedBy {
    Patient,
    Doctor,
    System,
}

/// Events accepted by the state machine. Creation is separate; these drive
/// an existing appointment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppointmentEvent {
    PatientConfirm,
    DoctorConfirm,
    PatientCancel { reason: String },
    DoctorCancel { reason: String },
    AutoExpire,
    Complete,
    MarkNoShow,
}

impl AppointmentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppointmentEvent::PatientConfirm => "patient_confirm",
            AppointmentEvent::DoctorConfirm => "doctor_confirm",
            AppointmentEvent::PatientCancel { .. } => "patient_cancel",
            AppointmentEvent::DoctorCancel { .. } => "doctor_cancel",
            AppointmentEvent::AutoExpire => "auto_expire",
            AppointmentEvent::Complete => "complete",
            AppointmentEvent::MarkNoShow => "mark_no_show",
        }
    }
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub office_id: Option<Uuid>,
    pub appointment_type: String,
    /// RFC 3339 with offset; stored in UTC.
    pub start: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub reason: Option<String>,
    pub created_by: Option<CreatedBy>,
    /// Per-reminder overrides; when absent the default policy applies.
    pub reminders: Option<Vec<ReminderSpec>>,
    /// Privileged callers may book outside the availability template.
    #[serde(default)]
    pub allow_off_template: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub event: Option<AppointmentEvent>,
    pub notes: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
    pub cancelled_by: Option<CreatedBy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub new_start: DateTime<Utc>,
    pub new_duration_minutes: Option<i32>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentListQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub doctor: Option<Uuid>,
    pub patient: Option<Uuid>,
    pub status: Option<AppointmentStatus>,
    pub limit: Option<i32>,
    pub offset: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedAppointment {
    pub appointment: Appointment,
    pub reminders: Vec<reminder_cell::models::Reminder>,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Patient not found")]
    PatientNotFound,

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Office not found")]
    OfficeNotFound,

    #[error("Illegal transition: {event} from {from}")]
    IllegalTransition { from: AppointmentStatus, event: String },

    #[error("Appointment overlaps an existing booking")]
    OverlapConflict,

    #[error("Requested start is not a bookable slot")]
    SlotNotAvailable,

    #[error("Doctor license is expired")]
    LicenseExpired,

    #[error("Validation failed")]
    ValidationFailed(Map<String, Value>),

    #[error("Concurrent modification, retry")]
    Conflict,

    #[error("Availability error: {0}")]
    Availability(#[from] availability_cell::models::AvailabilityError),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl AppointmentError {
    pub fn validation(field: &str, message: &str) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), Value::String(message.to_string()));
        AppointmentError::ValidationFailed(map)
    }
}
