// libs/reminder-cell/src/services/policy.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use shared_database::StoreClient;

use crate::models::{
    Reminder, ReminderError, ReminderSpec, UpdateReminderRequest,
    DEFAULT_REMINDER_OFFSETS, MAX_REMINDERS_PER_APPOINTMENT,
};

/// Appointment statuses in which an unsent reminder may still be edited.
const EDITABLE_STATUSES: [&str; 2] = ["pending_confirmation", "confirmed"];

pub struct ReminderPolicyService {
    store: Arc<StoreClient>,
}

impl ReminderPolicyService {
    pub fn new(store: Arc<StoreClient>) -> Self {
        Self { store }
    }

    /// The reminder rows for a fresh appointment: the default 24h/6h/1h set,
    /// or the caller's overrides after validation.
    pub fn build_rows(
        appointment_id: Uuid,
        overrides: Option<&[ReminderSpec]>,
    ) -> Result<Vec<Value>, ReminderError> {
        let specs: Vec<ReminderSpec> = match overrides {
            Some(specs) => {
                Self::validate_specs(specs)?;
                specs.to_vec()
            }
            None => DEFAULT_REMINDER_OFFSETS
                .iter()
                .enumerate()
                .map(|(i, &offset)| ReminderSpec {
                    ordinal: (i + 1) as i32,
                    offset_minutes: offset,
                    enabled: true,
                })
                .collect(),
        };

        let now = Utc::now().to_rfc3339();
        Ok(specs
            .into_iter()
            .map(|spec| {
                json!({
                    "id": Uuid::new_v4(),
                    "appointment_id": appointment_id,
                    "ordinal": spec.ordinal,
                    "offset_minutes": spec.offset_minutes,
                    "enabled": spec.enabled,
                    "sent": false,
                    "sent_at": null,
                    "provider_message_id": null,
                    "delivery_status": null,
                    "created_at": now,
                    "updated_at": now,
                })
            })
            .collect())
    }

    fn validate_specs(specs: &[ReminderSpec]) -> Result<(), ReminderError> {
        if specs.len() > MAX_REMINDERS_PER_APPOINTMENT {
            return Err(ReminderError::validation(
                "reminders",
                "at most three reminders per appointment",
            ));
        }
        let mut seen = Vec::new();
        for spec in specs {
            if spec.ordinal < 1 || spec.ordinal > MAX_REMINDERS_PER_APPOINTMENT as i32 {
                return Err(ReminderError::validation("ordinal", "must be between 1 and 3"));
            }
            if seen.contains(&spec.ordinal) {
                return Err(ReminderError::validation("ordinal", "ordinals must be unique"));
            }
            seen.push(spec.ordinal);
            if spec.offset_minutes <= 0 {
                return Err(ReminderError::validation(
                    "offset_minutes",
                    "offset must be positive",
                ));
            }
        }
        Ok(())
    }

    pub async fn list_for_appointment(
        &self,
        appointment_id: Uuid,
    ) -> Result<Vec<Reminder>, ReminderError> {
        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&order=ordinal.asc",
            appointment_id
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Reminder>, _>>()
            .map_err(|e| ReminderError::DatabaseError(format!("Failed to parse reminder: {}", e)))
    }

    /// Edit an unsent reminder. The appointment must still be in an editable
    /// status, and the `sent=eq.false` guard on the update keeps the latch:
    /// losing the race against the dispatcher surfaces as `Immutable`.
    pub async fn update_reminder(
        &self,
        appointment_id: Uuid,
        ordinal: i32,
        request: UpdateReminderRequest,
    ) -> Result<Reminder, ReminderError> {
        if let Some(offset) = request.offset_minutes {
            if offset <= 0 {
                return Err(ReminderError::validation(
                    "offset_minutes",
                    "offset must be positive",
                ));
            }
        }

        let status = self.fetch_appointment_status(appointment_id).await?;
        if !EDITABLE_STATUSES.contains(&status.as_str()) {
            return Err(ReminderError::AppointmentNotEditable(status));
        }

        let mut patch = serde_json::Map::new();
        if let Some(offset) = request.offset_minutes {
            patch.insert("offset_minutes".to_string(), json!(offset));
        }
        if let Some(enabled) = request.enabled {
            patch.insert("enabled".to_string(), json!(enabled));
        }
        if patch.is_empty() {
            return Err(ReminderError::validation("body", "nothing to update"));
        }
        patch.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&ordinal=eq.{}&sent=eq.false",
            appointment_id, ordinal
        );
        let rows = self
            .store
            .update_where(&path, Value::Object(patch))
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        match rows.into_iter().next() {
            Some(row) => {
                debug!("Reminder {}/{} updated", appointment_id, ordinal);
                serde_json::from_value(row).map_err(|e| {
                    ReminderError::DatabaseError(format!("Failed to parse reminder: {}", e))
                })
            }
            // Either the ordinal does not exist or the reminder was already
            // sent; disambiguate for the caller.
            None => {
                let existing = self.list_for_appointment(appointment_id).await?;
                if existing.iter().any(|r| r.ordinal == ordinal) {
                    Err(ReminderError::Immutable)
                } else {
                    Err(ReminderError::NotFound)
                }
            }
        }
    }

    async fn fetch_appointment_status(
        &self,
        appointment_id: Uuid,
    ) -> Result<String, ReminderError> {
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&select=id,status",
            appointment_id
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        let row = rows.into_iter().next().ok_or(ReminderError::NotFound)?;
        Ok(row["status"].as_str().unwrap_or_default().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_is_24h_6h_1h() {
        let rows = ReminderPolicyService::build_rows(Uuid::new_v4(), None).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0]["offset_minutes"], 1440);
        assert_eq!(rows[1]["offset_minutes"], 360);
        assert_eq!(rows[2]["offset_minutes"], 60);
        assert!(rows.iter().all(|r| r["sent"] == false));
    }

    #[test]
    fn overrides_are_validated() {
        let too_many: Vec<ReminderSpec> = (1..=4)
            .map(|i| ReminderSpec {
                ordinal: i,
                offset_minutes: 60,
                enabled: true,
            })
            .collect();
        assert!(ReminderPolicyService::build_rows(Uuid::new_v4(), Some(&too_many)).is_err());

        let negative = [ReminderSpec {
            ordinal: 1,
            offset_minutes: -5,
            enabled: true,
        }];
        assert!(ReminderPolicyService::build_rows(Uuid::new_v4(), Some(&negative)).is_err());

        let duplicate = [
            ReminderSpec {
                ordinal: 2,
                offset_minutes: 30,
                enabled: true,
            },
            ReminderSpec {
                ordinal: 2,
                offset_minutes: 90,
                enabled: false,
            },
        ];
        assert!(ReminderPolicyService::build_rows(Uuid::new_v4(), Some(&duplicate)).is_err());
    }

    #[test]
    fn send_at_subtracts_offset() {
        let reminder = Reminder {
            id: Uuid::new_v4(),
            appointment_id: Uuid::new_v4(),
            ordinal: 1,
            offset_minutes: 1440,
            enabled: true,
            sent: false,
            sent_at: None,
            provider_message_id: None,
            delivery_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let start = "2025-06-02T17:00:00Z".parse().unwrap();
        assert_eq!(
            reminder.send_at(start).to_rfc3339(),
            "2025-06-01T17:00:00+00:00"
        );
    }
}
