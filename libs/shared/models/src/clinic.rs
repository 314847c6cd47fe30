use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Doctor record as stored by the profile collaborator. The core reads it,
/// never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Doctor {
    pub id: Uuid,
    pub display_name: String,
    pub default_duration_minutes: i32,
    pub default_office_id: Uuid,
    pub is_active: bool,
}

/// Professional license ("cédula profesional"). An expired single license
/// blocks appointment creation; everything else about licensing lives with
/// the profile collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoctorLicense {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub license_number: String,
    pub expires_at: Option<NaiveDate>,
    pub is_active: bool,
}

impl DoctorLicense {
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expires_at.map(|d| d < today).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Office {
    pub id: Uuid,
    pub doctor_id: Uuid,
    /// IANA timezone name, e.g. "America/Mexico_City". May be empty for
    /// legacy rows; callers fall back to the configured default.
    pub timezone: String,
    pub is_virtual: bool,
    pub address: Option<String>,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
}

impl Office {
    pub fn timezone_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.timezone.is_empty() {
            fallback
        } else {
            &self.timezone
        }
    }
}
