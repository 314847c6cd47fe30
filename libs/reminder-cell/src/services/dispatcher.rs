// libs/reminder-cell/src/services/dispatcher.rs
//
// Stateless, idempotent tick invoked by an external cron. Safe under
// overlapping invocations: every send is gated by a conditional UPDATE that
// claims the reminder, so a reminder reaches the provider at most once. On
// messaging failure the claim is rolled back; on a provider timeout this can
// double-send if the provider actually delivered. A missed rollback drops
// the reminder rather than duplicating it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use availability_cell::services::clock::{Clock, ClockService};
use shared_config::AppConfig;
use shared_database::StoreClient;

use crate::models::{
    DispatchReport, DispatchableAppointment, PatientContact, Reminder, ReminderError,
};
use crate::services::messaging::{render_reminder_message, MessagingPort};

/// Appointment statuses whose reminders are still dispatchable.
const DISPATCHABLE_STATUSES: &str = "(pending_confirmation,confirmed)";

struct Candidate {
    reminder: Reminder,
    appointment: DispatchableAppointment,
    send_at: DateTime<Utc>,
}

pub struct ReminderDispatcherService {
    store: Arc<StoreClient>,
    messaging: Arc<dyn MessagingPort>,
    clock: Arc<dyn Clock>,
    grace: Duration,
    send_timeout: StdDuration,
    default_timezone: String,
}

impl ReminderDispatcherService {
    pub fn new(
        config: &AppConfig,
        store: Arc<StoreClient>,
        messaging: Arc<dyn MessagingPort>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            messaging,
            clock,
            grace: Duration::minutes(config.reminder_grace_minutes),
            send_timeout: StdDuration::from_secs(config.reminder_dispatch_timeout_seconds),
            default_timezone: config.default_timezone.clone(),
        }
    }

    /// One tick: collect due reminders, claim and send each, earliest due
    /// first. Returns the outcome counters for logging and the trigger
    /// response.
    pub async fn run_tick(&self) -> Result<DispatchReport, ReminderError> {
        let now = self.clock.now();
        let mut report = DispatchReport::default();

        let mut candidates = self.collect_candidates(now).await?;
        candidates.sort_by(|a, b| a.send_at.cmp(&b.send_at));
        report.examined = candidates.len() as u32;

        let contacts = self
            .fetch_contacts(candidates.iter().map(|c| c.appointment.patient_id))
            .await?;
        let doctor_names = self
            .fetch_doctor_names(candidates.iter().map(|c| c.appointment.doctor_id))
            .await?;
        let office_tzs = self
            .fetch_office_timezones(candidates.iter().map(|c| c.appointment.office_id))
            .await?;

        for candidate in candidates {
            if now < candidate.send_at {
                // Not due yet; the selection window is wider than the
                // eligibility window on purpose.
                continue;
            }
            if now > candidate.send_at + self.grace {
                self.abandon_past_grace(&candidate).await?;
                report.abandoned_past_grace += 1;
                continue;
            }

            match self
                .claim_and_send(&candidate, &contacts, &doctor_names, &office_tzs, now)
                .await?
            {
                SendOutcome::Sent => report.sent += 1,
                SendOutcome::AlreadyClaimed => report.already_claimed += 1,
                SendOutcome::Failed => report.failed += 1,
            }
        }

        report.legacy_sent = self
            .run_legacy_pass(now, &contacts, &doctor_names, &office_tzs)
            .await?;

        info!(
            "Reminder tick: examined={} sent={} already_claimed={} abandoned={} failed={} legacy={}",
            report.examined,
            report.sent,
            report.already_claimed,
            report.abandoned_past_grace,
            report.failed,
            report.legacy_sent
        );
        Ok(report)
    }

    // ==========================================================================
    // CANDIDATE SELECTION
    // ==========================================================================

    async fn collect_candidates(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, ReminderError> {
        let path = "/rest/v1/reminders?enabled=eq.true&sent=eq.false&order=appointment_id.asc";
        let rows = self
            .store
            .select(path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        let reminders: Vec<Reminder> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| ReminderError::DatabaseError(format!("Failed to parse reminder: {}", e)))?;

        if reminders.is_empty() {
            return Ok(Vec::new());
        }

        let appointment_ids: Vec<String> = reminders
            .iter()
            .map(|r| r.appointment_id.to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let appointments = self
            .fetch_dispatchable_appointments(&appointment_ids, now)
            .await?;
        let by_id: HashMap<Uuid, DispatchableAppointment> =
            appointments.into_iter().map(|a| (a.id, a)).collect();

        Ok(reminders
            .into_iter()
            .filter_map(|reminder| {
                // Reminders on cancelled or terminal appointments drop out
                // of the join; the status filter lives in the appointment
                // query.
                let appointment = by_id.get(&reminder.appointment_id)?.clone();
                let send_at = reminder.send_at(appointment.start_time);
                Some(Candidate {
                    reminder,
                    appointment,
                    send_at,
                })
            })
            .collect())
    }

    async fn fetch_dispatchable_appointments(
        &self,
        ids: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<DispatchableAppointment>, ReminderError> {
        let path = format!(
            "/rest/v1/appointments?id=in.({})&status=in.{}&start_time=gt.{}",
            ids.join(","),
            DISPATCHABLE_STATUSES,
            urlencoding::encode(&now.to_rfc3339()),
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| {
                ReminderError::DatabaseError(format!("Failed to parse appointment: {}", e))
            })
    }

    // ==========================================================================
    // CLAIM AND SEND
    // ==========================================================================

    async fn claim_and_send(
        &self,
        candidate: &Candidate,
        contacts: &HashMap<Uuid, PatientContact>,
        doctor_names: &HashMap<Uuid, String>,
        office_tzs: &HashMap<Uuid, String>,
        now: DateTime<Utc>,
    ) -> Result<SendOutcome, ReminderError> {
        // Atomic claim: the sent=eq.false guard makes concurrent workers
        // mutually exclusive; zero rows back means we lost.
        let claim_path = format!(
            "/rest/v1/reminders?id=eq.{}&sent=eq.false",
            candidate.reminder.id
        );
        let claimed = self
            .store
            .update_where(
                &claim_path,
                json!({ "sent": true, "sent_at": now.to_rfc3339() }),
            )
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        if claimed.is_empty() {
            debug!("Reminder {} already claimed", candidate.reminder.id);
            return Ok(SendOutcome::AlreadyClaimed);
        }

        match self
            .deliver(&candidate.appointment, contacts, doctor_names, office_tzs)
            .await
        {
            Ok(provider_message_id) => {
                let path = format!("/rest/v1/reminders?id=eq.{}", candidate.reminder.id);
                self.store
                    .update_where(
                        &path,
                        json!({
                            "provider_message_id": provider_message_id,
                            "delivery_status": "accepted",
                            "updated_at": now.to_rfc3339(),
                        }),
                    )
                    .await
                    .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
                Ok(SendOutcome::Sent)
            }
            Err(e) => {
                warn!(
                    "Messaging failed for reminder {}: {} - rolling back claim",
                    candidate.reminder.id, e
                );
                // Best-effort compensation; if this write fails too, the
                // reminder stays claimed and is dropped rather than
                // duplicated.
                let rollback_path = format!("/rest/v1/reminders?id=eq.{}", candidate.reminder.id);
                if let Err(rollback_err) = self
                    .store
                    .update_where(&rollback_path, json!({ "sent": false, "sent_at": null }))
                    .await
                {
                    warn!(
                        "Rollback failed for reminder {}: {}",
                        candidate.reminder.id, rollback_err
                    );
                }
                Ok(SendOutcome::Failed)
            }
        }
    }

    async fn deliver(
        &self,
        appointment: &DispatchableAppointment,
        contacts: &HashMap<Uuid, PatientContact>,
        doctor_names: &HashMap<Uuid, String>,
        office_tzs: &HashMap<Uuid, String>,
    ) -> Result<String, ReminderError> {
        let contact = contacts
            .get(&appointment.patient_id)
            .ok_or_else(|| ReminderError::MessagingFailed("patient contact missing".to_string()))?;
        let phone = contact
            .phone
            .as_deref()
            .ok_or_else(|| ReminderError::MessagingFailed("patient has no phone".to_string()))?;
        let doctor_name = doctor_names
            .get(&appointment.doctor_id)
            .map(|s| s.as_str())
            .unwrap_or("su médico");

        // The wall-clock hour in the message is the office's, not the
        // deployment default; a Tijuana office is two hours behind CDMX.
        let tz_name = office_tzs
            .get(&appointment.office_id)
            .map(String::as_str)
            .unwrap_or(&self.default_timezone);
        let tz = ClockService::parse_tz(tz_name)
            .map_err(|e| ReminderError::MessagingFailed(e.to_string()))?;
        let start_local = appointment.start_time.with_timezone(&tz);
        let body = render_reminder_message(&contact.full_name, doctor_name, start_local);

        match tokio::time::timeout(self.send_timeout, self.messaging.send_text(phone, &body)).await
        {
            Ok(Ok(message_id)) => Ok(message_id),
            Ok(Err(e)) => Err(ReminderError::MessagingFailed(e.to_string())),
            Err(_) => Err(ReminderError::MessagingFailed(format!(
                "provider call exceeded {}s",
                self.send_timeout.as_secs()
            ))),
        }
    }

    /// Past the grace window the reminder is abandoned, never sent late:
    /// disabled with the sent flag left false so the skip is auditable.
    async fn abandon_past_grace(&self, candidate: &Candidate) -> Result<(), ReminderError> {
        warn!(
            "Reminder {} past grace window (send_at {}), abandoning",
            candidate.reminder.id, candidate.send_at
        );
        let path = format!(
            "/rest/v1/reminders?id=eq.{}&sent=eq.false",
            candidate.reminder.id
        );
        self.store
            .update_where(&path, json!({ "enabled": false }))
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        Ok(())
    }

    // ==========================================================================
    // LEGACY SINGLE-FLAG PASS
    // ==========================================================================

    /// Appointments migrated from the old system carry a single
    /// auto-reminder flag instead of reminder rows. Same eligibility window,
    /// same claim pattern, applied at the appointment level.
    async fn run_legacy_pass(
        &self,
        now: DateTime<Utc>,
        contacts: &HashMap<Uuid, PatientContact>,
        doctor_names: &HashMap<Uuid, String>,
        office_tzs: &HashMap<Uuid, String>,
    ) -> Result<u32, ReminderError> {
        let path = format!(
            "/rest/v1/appointments?auto_reminder_enabled=eq.true&reminder_sent=eq.false&status=in.{}&start_time=gt.{}",
            DISPATCHABLE_STATUSES,
            urlencoding::encode(&now.to_rfc3339()),
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        let appointments: Vec<DispatchableAppointment> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| {
                ReminderError::DatabaseError(format!("Failed to parse appointment: {}", e))
            })?;

        if appointments.is_empty() {
            return Ok(0);
        }

        // Appointments that also have reminder rows are handled by the
        // multi-reminder path alone.
        let with_rows = self
            .appointments_with_reminder_rows(&appointments)
            .await?;

        let mut missing_contacts = Vec::new();
        for appointment in &appointments {
            if !contacts.contains_key(&appointment.patient_id) {
                missing_contacts.push(appointment.patient_id);
            }
        }
        let mut contacts = contacts.clone();
        if !missing_contacts.is_empty() {
            contacts.extend(self.fetch_contacts(missing_contacts.into_iter()).await?);
        }
        let mut doctor_names = doctor_names.clone();
        let missing_doctors: Vec<Uuid> = appointments
            .iter()
            .map(|a| a.doctor_id)
            .filter(|id| !doctor_names.contains_key(id))
            .collect();
        if !missing_doctors.is_empty() {
            doctor_names.extend(self.fetch_doctor_names(missing_doctors.into_iter()).await?);
        }
        let mut office_tzs = office_tzs.clone();
        let missing_offices: Vec<Uuid> = appointments
            .iter()
            .map(|a| a.office_id)
            .filter(|id| !office_tzs.contains_key(id))
            .collect();
        if !missing_offices.is_empty() {
            office_tzs.extend(
                self.fetch_office_timezones(missing_offices.into_iter())
                    .await?,
            );
        }

        let mut sent = 0;
        for appointment in appointments {
            if with_rows.contains(&appointment.id) {
                continue;
            }
            let offset = Duration::minutes(appointment.auto_reminder_offset_minutes.unwrap_or(1440));
            let send_at = appointment.start_time - offset;
            if now < send_at || now > send_at + self.grace {
                continue;
            }

            let claim_path = format!(
                "/rest/v1/appointments?id=eq.{}&reminder_sent=eq.false",
                appointment.id
            );
            let claimed = self
                .store
                .update_where(
                    &claim_path,
                    json!({ "reminder_sent": true, "reminder_sent_at": now.to_rfc3339() }),
                )
                .await
                .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
            if claimed.is_empty() {
                continue;
            }

            match self
                .deliver(&appointment, &contacts, &doctor_names, &office_tzs)
                .await
            {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(
                        "Legacy reminder failed for appointment {}: {} - rolling back",
                        appointment.id, e
                    );
                    let rollback = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
                    if let Err(rollback_err) = self
                        .store
                        .update_where(
                            &rollback,
                            json!({ "reminder_sent": false, "reminder_sent_at": null }),
                        )
                        .await
                    {
                        warn!(
                            "Legacy rollback failed for appointment {}: {}",
                            appointment.id, rollback_err
                        );
                    }
                }
            }
        }
        Ok(sent)
    }

    async fn appointments_with_reminder_rows(
        &self,
        appointments: &[DispatchableAppointment],
    ) -> Result<Vec<Uuid>, ReminderError> {
        let ids: Vec<String> = appointments.iter().map(|a| a.id.to_string()).collect();
        let path = format!(
            "/rest/v1/reminders?appointment_id=in.({})&select=appointment_id",
            ids.join(",")
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|v: Value| {
                v["appointment_id"]
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
            })
            .collect())
    }

    // ==========================================================================
    // LOOKUPS
    // ==========================================================================

    async fn fetch_contacts(
        &self,
        patient_ids: impl Iterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, PatientContact>, ReminderError> {
        let ids: Vec<String> = patient_ids
            .map(|id| id.to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = format!(
            "/rest/v1/patients?id=in.({})&select=id,full_name,phone",
            ids.join(",")
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;

        let contacts: Vec<PatientContact> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| ReminderError::DatabaseError(format!("Failed to parse patient: {}", e)))?;
        Ok(contacts.into_iter().map(|c| (c.id, c)).collect())
    }

    async fn fetch_doctor_names(
        &self,
        doctor_ids: impl Iterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, String>, ReminderError> {
        let ids: Vec<String> = doctor_ids
            .map(|id| id.to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = format!(
            "/rest/v1/doctors?id=in.({})&select=id,display_name",
            ids.join(",")
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|v: Value| {
                let id = v["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let name = v["display_name"].as_str()?.to_string();
                Some((id, name))
            })
            .collect())
    }

    /// Offices with no timezone column are absent from the map; rendering
    /// falls back to the deployment default for those.
    async fn fetch_office_timezones(
        &self,
        office_ids: impl Iterator<Item = Uuid>,
    ) -> Result<HashMap<Uuid, String>, ReminderError> {
        let ids: Vec<String> = office_ids
            .map(|id| id.to_string())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let path = format!(
            "/rest/v1/offices?id=in.({})&select=id,timezone",
            ids.join(",")
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| ReminderError::DatabaseError(e.to_string()))?;
        Ok(rows
            .into_iter()
            .filter_map(|v: Value| {
                let id = v["id"].as_str().and_then(|s| Uuid::parse_str(s).ok())?;
                let tz = v["timezone"].as_str()?.to_string();
                Some((id, tz))
            })
            .collect())
    }
}

enum SendOutcome {
    Sent,
    AlreadyClaimed,
    Failed,
}
