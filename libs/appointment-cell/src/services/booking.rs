// libs/appointment-cell/src/services/booking.rs
//
// Creation and transitions against the store. Creation takes the doctor-day
// lock, rechecks overlap under it, then writes the appointment and its
// reminder rows; transitions go through the state machine and commit with a
// status+revision guard so concurrent writers observe each other.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use availability_cell::services::clock::{Clock, ClockService, SystemClock};
use availability_cell::AvailabilityService;
use calendar_cell::models::{CalendarAction, CalendarPush};
use calendar_cell::CalendarMirrorService;
use reminder_cell::models::Reminder;
use reminder_cell::ReminderPolicyService;
use shared_config::AppConfig;
use shared_database::StoreClient;
use shared_models::clinic::{Doctor, DoctorLicense, Office};

use crate::models::{
    Appointment, AppointmentError, AppointmentEvent, AppointmentListQuery, AppointmentStatus,
    CancelAppointmentRequest, CreateAppointmentRequest, CreatedAppointment, CreatedBy,
    RescheduleAppointmentRequest, UpdateAppointmentRequest,
};
use crate::services::lifecycle::{AppointmentLifecycleService, CalendarSync};
use crate::services::locking::{map_store_error, SchedulingLockService};

const LOCK_ATTEMPTS: u32 = 3;
const LOCK_RETRY_MS: u64 = 120;

pub struct AppointmentBookingService {
    store: Arc<StoreClient>,
    availability: AvailabilityService,
    lifecycle: AppointmentLifecycleService,
    locks: SchedulingLockService,
    mirror: Arc<CalendarMirrorService>,
    clock: Arc<dyn Clock>,
    default_timezone: String,
}

impl AppointmentBookingService {
    pub fn new(config: &AppConfig) -> Self {
        let store = Arc::new(StoreClient::new(config));
        Self {
            availability: AvailabilityService::with_store(
                store.clone(),
                config.default_timezone.clone(),
            ),
            lifecycle: AppointmentLifecycleService::new(),
            locks: SchedulingLockService::new(store.clone()),
            mirror: Arc::new(CalendarMirrorService::new(config, store.clone())),
            clock: Arc::new(SystemClock),
            default_timezone: config.default_timezone.clone(),
            store,
        }
    }

    // ==========================================================================
    // CREATION
    // ==========================================================================

    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
    ) -> Result<CreatedAppointment, AppointmentError> {
        let now = self.clock.now();

        if request.start <= now {
            return Err(AppointmentError::validation(
                "start",
                "Appointment start must be in the future",
            ));
        }

        self.verify_patient_active(request.patient_id).await?;
        let doctor = self.fetch_doctor(request.doctor_id).await?;
        let office_id = request.office_id.unwrap_or(doctor.default_office_id);
        let office = self.fetch_office(office_id).await?;

        let duration = request
            .duration_minutes
            .unwrap_or(doctor.default_duration_minutes);
        if duration <= 0 {
            return Err(AppointmentError::validation(
                "duration_minutes",
                "Duration must be positive",
            ));
        }
        let end = request.start + Duration::minutes(duration as i64);

        self.check_license_gate(&doctor, &office, now).await?;

        if !request.allow_off_template {
            let bookable = self
                .availability
                .is_slot_boundary(doctor.id, request.start, duration)
                .await?;
            if !bookable {
                return Err(AppointmentError::SlotNotAvailable);
            }
        }

        // Reminder rows are validated before any write so bad overrides
        // never leave a half-created appointment behind.
        let appointment_id = Uuid::new_v4();
        let reminder_rows =
            ReminderPolicyService::build_rows(appointment_id, request.reminders.as_deref())
                .map_err(map_reminder_error)?;

        let tz = ClockService::parse_tz(office.timezone_or(&self.default_timezone))?;
        let lock_day = ClockService::to_wall(request.start, tz).date();
        let lock_key = SchedulingLockService::lock_key(doctor.id, lock_day);

        self.acquire_with_retry(&lock_key, doctor.id, now).await?;

        let created = self
            .create_under_lock(appointment_id, &request, &doctor, &office, end, reminder_rows, now)
            .await;

        if let Err(e) = self.locks.release(&lock_key).await {
            warn!("Lock release failed for {}: {}", lock_key, e);
        }

        let created = created?;

        self.mirror.clone().spawn_push(CalendarPush {
            appointment_id: created.appointment.id,
            revision: created.appointment.revision,
            action: CalendarAction::Upsert,
            doctor_id: doctor.id,
            start_time: created.appointment.start_time,
            end_time: created.appointment.end_time,
            summary: format!("{} - {}", created.appointment.appointment_type, doctor.display_name),
        });

        info!(
            "Created appointment {} for doctor {} at {}",
            created.appointment.id, doctor.id, created.appointment.start_time
        );
        Ok(created)
    }

    async fn create_under_lock(
        &self,
        appointment_id: Uuid,
        request: &CreateAppointmentRequest,
        doctor: &Doctor,
        office: &Office,
        end: DateTime<Utc>,
        reminder_rows: Vec<Value>,
        now: DateTime<Utc>,
    ) -> Result<CreatedAppointment, AppointmentError> {
        if self.has_overlap(doctor.id, request.start, end).await? {
            return Err(AppointmentError::OverlapConflict);
        }

        let created_by = request.created_by.unwrap_or(CreatedBy::Patient);
        let status =
            AppointmentLifecycleService::initial_status(created_by == CreatedBy::Doctor);

        let row = json!({
            "id": appointment_id,
            "patient_id": request.patient_id,
            "doctor_id": doctor.id,
            "office_id": office.id,
            "appointment_type": request.appointment_type,
            "start_time": request.start.to_rfc3339(),
            "end_time": end.to_rfc3339(),
            "status": status,
            "reason": request.reason,
            "auto_reminder_enabled": false,
            "reminder_sent": false,
            "created_by": created_by,
            "revision": 1,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339(),
            "confirmed_at": if status == AppointmentStatus::Confirmed {
                Some(now.to_rfc3339())
            } else {
                None
            },
        });

        let inserted = self
            .store
            .insert_returning("/rest/v1/appointments", json!([row]))
            .await
            .map_err(map_store_error)?;
        let appointment: Appointment = decode_one(inserted)?;

        let reminders = match self
            .store
            .insert_returning("/rest/v1/reminders", json!(reminder_rows))
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .map(serde_json::from_value::<Reminder>)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?,
            Err(e) => {
                // Compensate so the appointment never exists without its
                // reminder set.
                warn!(
                    "Reminder insert failed for appointment {}, rolling back: {}",
                    appointment.id, e
                );
                let path = format!("/rest/v1/appointments?id=eq.{}", appointment.id);
                if let Err(delete_err) = self.store.delete_where(&path).await {
                    warn!(
                        "Compensating delete failed for appointment {}: {}",
                        appointment.id, delete_err
                    );
                }
                return Err(map_store_error(e));
            }
        };

        Ok(CreatedAppointment {
            appointment,
            reminders,
        })
    }

    async fn acquire_with_retry(
        &self,
        lock_key: &str,
        doctor_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        for attempt in 0..LOCK_ATTEMPTS {
            if self.locks.acquire(lock_key, doctor_id, now).await? {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(
                LOCK_RETRY_MS * (attempt as u64 + 1),
            ))
            .await;
        }
        Err(AppointmentError::Conflict)
    }

    async fn has_overlap(
        &self,
        doctor_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&status=neq.cancelled&start_time=lt.{}&end_time=gt.{}&select=id",
            doctor_id,
            urlencoding::encode(&end.to_rfc3339()),
            urlencoding::encode(&start.to_rfc3339()),
        );
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        Ok(!rows.is_empty())
    }

    // ==========================================================================
    // TRANSITIONS
    // ==========================================================================

    pub async fn apply_event(
        &self,
        appointment_id: Uuid,
        event: AppointmentEvent,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.get(appointment_id).await?;
        let outcome = self.lifecycle.apply(appointment.status, &event)?;
        let now = self.clock.now();

        let mut patch = json!({
            "status": outcome.new_status,
            "revision": appointment.revision + 1,
            "updated_at": now.to_rfc3339(),
        });
        if outcome.set_confirmed_at {
            patch["confirmed_at"] = json!(now.to_rfc3339());
        }
        if outcome.set_cancelled_at {
            patch["cancelled_at"] = json!(now.to_rfc3339());
        }
        if let Some(reason) = &outcome.cancellation_reason {
            patch["cancellation_reason"] = json!(reason);
        }

        // Guarded write: if another worker transitioned or bumped the row
        // first, zero rows come back and the caller retries with fresh state.
        let path = format!(
            "/rest/v1/appointments?id=eq.{}&status=eq.{}&revision=eq.{}",
            appointment.id, appointment.status, appointment.revision
        );
        let updated = self
            .store
            .update_where(&path, patch)
            .await
            .map_err(map_store_error)?;
        if updated.is_empty() {
            return Err(AppointmentError::Conflict);
        }
        let updated: Appointment = decode_one(updated)?;

        if outcome.disable_unsent_reminders {
            self.disable_unsent_reminders(appointment.id).await?;
        }

        match outcome.calendar_sync {
            CalendarSync::None => {}
            CalendarSync::Push | CalendarSync::Invalidate => {
                let action = if outcome.calendar_sync == CalendarSync::Push {
                    CalendarAction::Upsert
                } else {
                    CalendarAction::Invalidate
                };
                self.mirror.clone().spawn_push(CalendarPush {
                    appointment_id: updated.id,
                    revision: updated.revision,
                    action,
                    doctor_id: updated.doctor_id,
                    start_time: updated.start_time,
                    end_time: updated.end_time,
                    summary: updated.appointment_type.clone(),
                });
            }
        }

        info!(
            "Appointment {} transitioned {} -> {} via {}",
            updated.id,
            appointment.status,
            updated.status,
            event.name()
        );
        Ok(updated)
    }

    /// Unsent reminders are switched off in the same mutation batch as the
    /// status write; already-sent rows are untouched.
    async fn disable_unsent_reminders(
        &self,
        appointment_id: Uuid,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/reminders?appointment_id=eq.{}&sent=eq.false",
            appointment_id
        );
        self.store
            .update_where_with_retry(&path, json!({ "enabled": false }))
            .await
            .map_err(map_store_error)?;
        Ok(())
    }

    pub async fn update(
        &self,
        appointment_id: Uuid,
        request: UpdateAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let mut current = if let Some(event) = request.event {
            self.apply_event(appointment_id, event).await?
        } else {
            self.get(appointment_id).await?
        };

        if request.notes.is_some() || request.reason.is_some() {
            let mut patch = json!({ "updated_at": self.clock.now().to_rfc3339() });
            if let Some(notes) = &request.notes {
                patch["notes"] = json!(notes);
            }
            if let Some(reason) = &request.reason {
                patch["reason"] = json!(reason);
            }
            let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
            let updated = self
                .store
                .update_where(&path, patch)
                .await
                .map_err(map_store_error)?;
            current = decode_one(updated)?;
        }
        Ok(current)
    }

    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        request: CancelAppointmentRequest,
    ) -> Result<Appointment, AppointmentError> {
        let event = match request.cancelled_by.unwrap_or(CreatedBy::Patient) {
            CreatedBy::Patient => AppointmentEvent::PatientCancel {
                reason: request.reason,
            },
            CreatedBy::Doctor | CreatedBy::System => AppointmentEvent::DoctorCancel {
                reason: request.reason,
            },
        };
        self.apply_event(appointment_id, event).await
    }

    /// A reschedule is a cancellation plus a fresh creation; the new
    /// appointment gets a new id and a fresh default reminder set.
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<CreatedAppointment, AppointmentError> {
        let old = self.get(appointment_id).await?;
        let reason = request
            .reason
            .clone()
            .unwrap_or_else(|| "rescheduled".to_string());

        let event = match old.created_by {
            CreatedBy::Doctor => AppointmentEvent::DoctorCancel { reason },
            _ => AppointmentEvent::PatientCancel { reason },
        };
        self.apply_event(old.id, event).await?;

        self.create(CreateAppointmentRequest {
            patient_id: old.patient_id,
            doctor_id: old.doctor_id,
            office_id: Some(old.office_id),
            appointment_type: old.appointment_type.clone(),
            start: request.new_start,
            duration_minutes: request
                .new_duration_minutes
                .or(Some(old.duration_minutes() as i32)),
            reason: old.reason.clone(),
            created_by: Some(old.created_by),
            reminders: None,
            allow_off_template: false,
        })
        .await
    }

    // ==========================================================================
    // READS
    // ==========================================================================

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        let row = rows.into_iter().next().ok_or(AppointmentError::NotFound)?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    pub async fn list(
        &self,
        query: &AppointmentListQuery,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut path = String::from("/rest/v1/appointments?order=start_time.asc");
        if let Some(doctor) = query.doctor {
            path.push_str(&format!("&doctor_id=eq.{}", doctor));
        }
        if let Some(patient) = query.patient {
            path.push_str(&format!("&patient_id=eq.{}", patient));
        }
        if let Some(status) = query.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(start) = query.start {
            path.push_str(&format!(
                "&start_time=gte.{}",
                urlencoding::encode(&start.to_rfc3339())
            ));
        }
        if let Some(end) = query.end {
            path.push_str(&format!(
                "&start_time=lt.{}",
                urlencoding::encode(&end.to_rfc3339())
            ));
        }
        path.push_str(&format!("&limit={}", query.limit.unwrap_or(100).clamp(1, 500)));
        if let Some(offset) = query.offset {
            path.push_str(&format!("&offset={}", offset.max(0)));
        }

        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    /// Listing timestamps are UTC; the accompanying tz names the zone to
    /// render them in. With a doctor filter that is the doctor's office
    /// zone, otherwise the deployment default.
    pub async fn listing_timezone(&self, query: &AppointmentListQuery) -> String {
        if let Some(doctor_id) = query.doctor {
            if let Ok(doctor) = self.fetch_doctor(doctor_id).await {
                if let Ok(office) = self.fetch_office(doctor.default_office_id).await {
                    return office.timezone_or(&self.default_timezone).to_string();
                }
            }
        }
        self.default_timezone.clone()
    }

    // ==========================================================================
    // REFERENCE LOOKUPS
    // ==========================================================================

    async fn verify_patient_active(&self, patient_id: Uuid) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/patients?id=eq.{}&is_active=eq.true&select=id",
            patient_id
        );
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        if rows.is_empty() {
            return Err(AppointmentError::PatientNotFound);
        }
        Ok(())
    }

    async fn fetch_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AppointmentError> {
        let path = format!(
            "/rest/v1/doctors?id=eq.{}&is_active=eq.true",
            doctor_id
        );
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(AppointmentError::DoctorNotFound)?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    async fn fetch_office(&self, office_id: Uuid) -> Result<Office, AppointmentError> {
        let path = format!(
            "/rest/v1/offices?id=eq.{}&is_active=eq.true",
            office_id
        );
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(AppointmentError::OfficeNotFound)?;
        serde_json::from_value(row).map_err(|e| AppointmentError::DatabaseError(e.to_string()))
    }

    /// The one domain-level credential gate: a doctor whose only active
    /// license has expired cannot take new bookings. Doctors with several
    /// active licenses (multi-state registrations) pass as long as any one
    /// could be current; that disambiguation belongs to back office review.
    async fn check_license_gate(
        &self,
        doctor: &Doctor,
        office: &Office,
        now: DateTime<Utc>,
    ) -> Result<(), AppointmentError> {
        let path = format!(
            "/rest/v1/doctor_licenses?doctor_id=eq.{}&is_active=eq.true",
            doctor.id
        );
        let rows = self.store.select(&path).await.map_err(map_store_error)?;
        let licenses: Vec<DoctorLicense> = rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()
            .map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        if licenses.len() == 1 {
            let tz = ClockService::parse_tz(office.timezone_or(&self.default_timezone))?;
            let today = ClockService::today_in(now, tz);
            if licenses[0].is_expired(today) {
                return Err(AppointmentError::LicenseExpired);
            }
        }
        Ok(())
    }
}

fn decode_one(mut rows: Vec<Value>) -> Result<Appointment, AppointmentError> {
    if rows.is_empty() {
        return Err(AppointmentError::DatabaseError(
            "Store returned no representation".to_string(),
        ));
    }
    serde_json::from_value(rows.remove(0))
        .map_err(|e| AppointmentError::DatabaseError(e.to_string()))
}

fn map_reminder_error(e: reminder_cell::models::ReminderError) -> AppointmentError {
    use reminder_cell::models::ReminderError;
    match e {
        ReminderError::ValidationFailed(details) => AppointmentError::ValidationFailed(details),
        other => AppointmentError::DatabaseError(other.to_string()),
    }
}
