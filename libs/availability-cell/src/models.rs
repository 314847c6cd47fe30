// libs/availability-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// AVAILABILITY TEMPLATE MODELS
// ==============================================================================

/// Weekly recurring availability for one doctor on one weekday. Wall-clock
/// times carry no date and are interpreted in the office timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityTemplate {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// 0 = Sunday .. 6 = Saturday, matching the stored convention.
    pub day_of_week: i32,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub slot_duration_minutes: i32,
    pub lunch_start: Option<NaiveTime>,
    pub lunch_end: Option<NaiveTime>,
    /// Explicit working sub-blocks. When present they replace the
    /// `[start_time, end_time)` minus lunch construction.
    pub sub_blocks: Option<Vec<SubBlock>>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubBlock {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl AvailabilityTemplate {
    /// Enforce the template invariants before any slot math runs. A broken
    /// template is a configuration error surfaced to the caller.
    pub fn validate(&self) -> Result<(), AvailabilityError> {
        if self.start_time >= self.end_time {
            return Err(AvailabilityError::TemplateInvariantViolated(
                "start_time must be before end_time".to_string(),
            ));
        }
        if self.slot_duration_minutes <= 0 {
            return Err(AvailabilityError::TemplateInvariantViolated(
                "slot_duration_minutes must be positive".to_string(),
            ));
        }
        match (self.lunch_start, self.lunch_end) {
            (Some(ls), Some(le)) => {
                if ls >= le {
                    return Err(AvailabilityError::TemplateInvariantViolated(
                        "lunch_start must be before lunch_end".to_string(),
                    ));
                }
                if ls < self.start_time || le > self.end_time {
                    return Err(AvailabilityError::TemplateInvariantViolated(
                        "lunch interval must lie inside working hours".to_string(),
                    ));
                }
            }
            (None, None) => {}
            _ => {
                return Err(AvailabilityError::TemplateInvariantViolated(
                    "lunch_start and lunch_end must be set together".to_string(),
                ));
            }
        }
        if let Some(blocks) = &self.sub_blocks {
            let mut previous_end: Option<NaiveTime> = None;
            for block in blocks {
                if block.start_time >= block.end_time {
                    return Err(AvailabilityError::TemplateInvariantViolated(
                        "sub-block start must be before its end".to_string(),
                    ));
                }
                if let Some(prev) = previous_end {
                    if block.start_time < prev {
                        return Err(AvailabilityError::TemplateInvariantViolated(
                            "sub-blocks must be ordered and non-overlapping".to_string(),
                        ));
                    }
                }
                previous_end = Some(block.end_time);
            }
        }
        Ok(())
    }

    /// The day's working wall-clock intervals: explicit sub-blocks, or
    /// `[start, end)` with the lunch interval punched out.
    pub fn working_intervals(&self) -> Vec<(NaiveTime, NaiveTime)> {
        if let Some(blocks) = &self.sub_blocks {
            if !blocks.is_empty() {
                return blocks.iter().map(|b| (b.start_time, b.end_time)).collect();
            }
        }
        match (self.lunch_start, self.lunch_end) {
            (Some(ls), Some(le)) => vec![(self.start_time, ls), (le, self.end_time)],
            _ => vec![(self.start_time, self.end_time)],
        }
    }
}

// ==============================================================================
// SLOT MODELS
// ==============================================================================

/// One bookable (or visibly busy) interval of a doctor's day, in UTC.
/// Busy slots stay in the listing so callers can render the full day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotView {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub available: bool,
    pub blocking_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailabilityResponse {
    pub doctor_id: Uuid,
    /// IANA timezone the wall-clock math ran in.
    pub tz: String,
    pub slots: Vec<SlotView>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub doctor: Uuid,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub duration: Option<i32>,
}

/// Minimal view of a booked appointment, enough for the overlap subtraction.
/// The full entity lives with the appointment cell; this cell only needs the
/// window and the status.
#[derive(Debug, Clone, Deserialize)]
pub struct BookedWindow {
    pub id: Uuid,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: String,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Template invariant violated: {0}")]
    TemplateInvariantViolated(String),

    #[error("Unknown timezone: {0}")]
    TimezoneUnknown(String),

    #[error("Date range too large: {0}")]
    RangeTooLarge(String),

    #[error("Doctor not found")]
    DoctorNotFound,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}
