// libs/reminder-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Default policy: 24 hours, 6 hours, and 1 hour before the appointment.
pub const DEFAULT_REMINDER_OFFSETS: [i64; 3] = [1440, 360, 60];

pub const MAX_REMINDERS_PER_APPOINTMENT: usize = 3;

// ==============================================================================
// REMINDER MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Uuid,
    pub appointment_id: Uuid,
    /// Stable label 1..3, not a priority.
    pub ordinal: i32,
    pub offset_minutes: i64,
    pub enabled: bool,
    /// Write-once latch; see the dispatcher for the single documented
    /// rollback exception.
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub provider_message_id: Option<String>,
    pub delivery_status: Option<DeliveryStatus>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reminder {
    /// The instant this reminder becomes eligible for dispatch.
    pub fn send_at(&self, appointment_start: DateTime<Utc>) -> DateTime<Utc> {
        appointment_start - Duration::minutes(self.offset_minutes)
    }
}

/// Provider acknowledgement state, written by the webhook ingestor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Accepted,
    Delivered,
    Read,
    Failed,
}

/// Per-reminder override accepted at appointment creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReminderSpec {
    pub ordinal: i32,
    pub offset_minutes: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateReminderRequest {
    pub offset_minutes: Option<i64>,
    pub enabled: Option<bool>,
}

// ==============================================================================
// DISPATCHER VIEWS
// ==============================================================================

/// Slim appointment view the dispatcher joins against. The full entity lives
/// with the appointment cell; reminders only need the window, the status and
/// the legacy flags.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchableAppointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub office_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub auto_reminder_enabled: bool,
    pub auto_reminder_offset_minutes: Option<i64>,
    #[serde(default)]
    pub reminder_sent: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatientContact {
    pub id: Uuid,
    pub full_name: String,
    pub phone: Option<String>,
}

/// Outcome counters for one dispatcher tick, returned by the internal
/// trigger and logged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub examined: u32,
    pub sent: u32,
    pub already_claimed: u32,
    pub abandoned_past_grace: u32,
    pub failed: u32,
    pub legacy_sent: u32,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("Reminder not found")]
    NotFound,

    #[error("Reminder is immutable once sent")]
    Immutable,

    #[error("Appointment no longer accepts reminder edits: {0}")]
    AppointmentNotEditable(String),

    #[error("Validation failed")]
    ValidationFailed(Map<String, Value>),

    #[error("Messaging failed: {0}")]
    MessagingFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

impl ReminderError {
    pub fn validation(field: &str, message: &str) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), Value::String(message.to_string()));
        ReminderError::ValidationFailed(map)
    }
}
