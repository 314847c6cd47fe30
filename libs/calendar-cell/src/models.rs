// libs/calendar-cell/src/models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per appointment recording the mirrored external event and the
/// last sync outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarLink {
    pub id: Uuid,
    pub appointment_id: Uuid,
    pub external_event_id: Option<String>,
    pub last_synced_revision: i64,
    pub sync_status: CalendarSyncStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CalendarSyncStatus {
    Synced,
    Failed,
    Invalidated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    Upsert,
    Invalidate,
}

/// The mirror's slim view of an appointment change. The full entity lives
/// with the appointment cell; the mirror only needs the window, the doctor
/// and a display summary.
#[derive(Debug, Clone)]
pub struct CalendarPush {
    pub appointment_id: Uuid,
    pub revision: i64,
    pub action: CalendarAction,
    pub doctor_id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub summary: String,
}

impl CalendarPush {
    /// Retries of the same committed transition replay the same key, so the
    /// external calendar deduplicates them.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.appointment_id, self.revision)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar request failed: {0}")]
    Transport(String),

    #[error("calendar mirror not configured")]
    NotConfigured,

    #[error("database error: {0}")]
    DatabaseError(String),
}
