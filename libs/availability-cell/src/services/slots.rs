// libs/availability-cell/src/services/slots.rs
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::StoreClient;
use shared_models::clinic::{Doctor, Office};

use crate::models::{
    AvailabilityError, AvailabilityQuery, AvailabilityResponse, AvailabilityTemplate,
    BookedWindow, SlotView,
};
use crate::services::clock::{ClockService, WallClockAdjustment};

/// Availability queries beyond this span fail with `RangeTooLarge`.
const MAX_RANGE_DAYS: i64 = 92;

pub struct AvailabilityService {
    store: Arc<StoreClient>,
    default_timezone: String,
}

impl AvailabilityService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            store: Arc::new(StoreClient::new(config)),
            default_timezone: config.default_timezone.clone(),
        }
    }

    pub fn with_store(store: Arc<StoreClient>, default_timezone: String) -> Self {
        Self {
            store,
            default_timezone,
        }
    }

    /// Compute the bookable slots for a doctor over an inclusive date range,
    /// in the office timezone, with existing non-cancelled appointments
    /// subtracted (kept in the listing as busy markers).
    pub async fn get_available_slots(
        &self,
        query: &AvailabilityQuery,
    ) -> Result<AvailabilityResponse, AvailabilityError> {
        debug!(
            "Calculating slots for doctor {} from {} to {}",
            query.doctor, query.start, query.end
        );

        if query.end < query.start {
            return Err(AvailabilityError::InvalidQuery(
                "end date must not precede start date".to_string(),
            ));
        }
        let span_days = (query.end - query.start).num_days() + 1;
        if span_days > MAX_RANGE_DAYS {
            return Err(AvailabilityError::RangeTooLarge(format!(
                "requested {} days, maximum is {}",
                span_days, MAX_RANGE_DAYS
            )));
        }

        let doctor = self.fetch_doctor(query.doctor).await?;
        let office = self.fetch_office(doctor.default_office_id).await?;
        let tz_name = office.timezone_or(&self.default_timezone).to_string();
        let tz = ClockService::parse_tz(&tz_name)?;

        let slot_minutes = query.duration.unwrap_or(doctor.default_duration_minutes);
        if slot_minutes <= 0 {
            return Err(AvailabilityError::InvalidQuery(
                "duration must be positive".to_string(),
            ));
        }

        let templates = self.fetch_templates(query.doctor).await?;
        let booked = self
            .fetch_booked_windows(query.doctor, query.start, query.end, tz)
            .await?;

        let mut slots = Vec::new();
        let mut date = query.start;
        while date <= query.end {
            if let Some(template) = templates
                .iter()
                .find(|t| t.day_of_week == weekday_index(date.weekday()) && t.is_active)
            {
                template.validate()?;
                slots.extend(Self::carve_day(template, date, slot_minutes, tz, &booked));
            }
            date += Duration::days(1);
        }

        slots.sort_by(|a, b| a.start_time.cmp(&b.start_time));

        Ok(AvailabilityResponse {
            doctor_id: query.doctor,
            tz: tz_name,
            slots,
        })
    }

    /// Check whether an instant is exactly a bookable slot boundary of the
    /// doctor's template for that civil day. Used by the booking path.
    pub async fn is_slot_boundary(
        &self,
        doctor_id: Uuid,
        start_utc: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<bool, AvailabilityError> {
        let doctor = self.fetch_doctor(doctor_id).await?;
        let office = self.fetch_office(doctor.default_office_id).await?;
        let tz = ClockService::parse_tz(office.timezone_or(&self.default_timezone))?;

        let wall = ClockService::to_wall(start_utc, tz);
        let date = wall.date();

        let templates = self.fetch_templates(doctor_id).await?;
        let Some(template) = templates
            .iter()
            .find(|t| t.day_of_week == weekday_index(date.weekday()) && t.is_active)
        else {
            return Ok(false);
        };
        template.validate()?;

        let slot_minutes = if duration_minutes > 0 {
            duration_minutes
        } else {
            template.slot_duration_minutes
        };

        Ok(Self::wall_slots(template, slot_minutes)
            .into_iter()
            .any(|(slot_start, _)| slot_start == wall.time()))
    }

    // ==========================================================================
    // PRIVATE HELPER METHODS
    // ==========================================================================

    /// Wall-clock slot starts for one template: consecutive slots from each
    /// working interval's start, no partial slots, lunch never intersected.
    fn wall_slots(template: &AvailabilityTemplate, slot_minutes: i32) -> Vec<(NaiveTime, NaiveTime)> {
        let step = Duration::minutes(slot_minutes as i64);
        let mut out = Vec::new();
        for (interval_start, interval_end) in template.working_intervals() {
            let mut cursor = interval_start;
            loop {
                let slot_end = cursor + step;
                // `+` on NaiveTime wraps at midnight; a wrap shows up as
                // slot_end <= cursor and terminates the interval.
                if slot_end <= cursor || slot_end > interval_end {
                    break;
                }
                out.push((cursor, slot_end));
                cursor = slot_end;
            }
        }
        out
    }

    fn carve_day(
        template: &AvailabilityTemplate,
        date: NaiveDate,
        slot_minutes: i32,
        tz: Tz,
        booked: &[BookedWindow],
    ) -> Vec<SlotView> {
        let mut views = Vec::new();
        for (wall_start, wall_end) in Self::wall_slots(template, slot_minutes) {
            let start = ClockService::to_utc(date.and_time(wall_start), tz);
            let end = ClockService::to_utc(date.and_time(wall_end), tz);
            if start.adjustment != WallClockAdjustment::Exact {
                warn!(
                    "Slot {} {} needed DST adjustment ({:?})",
                    date, wall_start, start.adjustment
                );
            }

            let blocking = booked.iter().find(|b| {
                b.status != "cancelled"
                    && start.instant < b.end_time
                    && b.start_time < end.instant
            });

            views.push(SlotView {
                start_time: start.instant,
                end_time: end.instant,
                available: blocking.is_none(),
                blocking_appointment_id: blocking.map(|b| b.id),
            });
        }
        views
    }

    async fn fetch_doctor(&self, doctor_id: Uuid) -> Result<Doctor, AvailabilityError> {
        let path = format!("/rest/v1/doctors?id=eq.{}", doctor_id);
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| AvailabilityError::DatabaseError(e.to_string()))?;
        let row = rows.into_iter().next().ok_or(AvailabilityError::DoctorNotFound)?;
        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse doctor: {}", e)))
    }

    async fn fetch_office(&self, office_id: Uuid) -> Result<Office, AvailabilityError> {
        let path = format!("/rest/v1/offices?id=eq.{}", office_id);
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| AvailabilityError::DatabaseError(e.to_string()))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::DatabaseError("office missing".to_string()))?;
        serde_json::from_value(row)
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse office: {}", e)))
    }

    async fn fetch_templates(
        &self,
        doctor_id: Uuid,
    ) -> Result<Vec<AvailabilityTemplate>, AvailabilityError> {
        let path = format!(
            "/rest/v1/availability_templates?doctor_id=eq.{}&order=day_of_week.asc",
            doctor_id
        );
        let rows = self
            .store
            .select(&path)
            .await
            .map_err(|e| AvailabilityError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(|v: Value| serde_json::from_value(v))
            .collect::<Result<Vec<AvailabilityTemplate>, _>>()
            .map_err(|e| AvailabilityError::DatabaseError(format!("Failed to parse template: {}", e)))
    }

    /// Non-cancelled appointments overlapping the query range. The range is
    /// widened a day on each side so zone offsets never clip an edge.
    async fn fetch_booked_windows(
        &self,
        doctor_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
        _tz: Tz,
    ) -> Result<Vec<BookedWindow>, AvailabilityError> {
        let range_start = (start - Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_utc();
        let range_end = (end + Duration::days(1))
            .and_hms_opt(23, 59, 59)
            .unwrap()
            .and_utc();

        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_time=lte.{}&end_time=gte.{}&status=neq.cancelled&order=start_time.asc",
            doctor_id,
            urlencoding::encode(&range_end.to_rfc3339()),
            urlencoding::encode(&range_start.to_rfc3339()),
        );

        let rows: Vec<Value> = self
            .store
            .request(Method::GET, &path, None)
            .await
            .map_err(|e| AvailabilityError::DatabaseError(e.to_string()))?;

        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<BookedWindow>, _>>()
            .map_err(|e| {
                AvailabilityError::DatabaseError(format!("Failed to parse appointments: {}", e))
            })
    }
}

fn weekday_index(weekday: Weekday) -> i32 {
    match weekday {
        Weekday::Sun => 0,
        Weekday::Mon => 1,
        Weekday::Tue => 2,
        Weekday::Wed => 3,
        Weekday::Thu => 4,
        Weekday::Fri => 5,
        Weekday::Sat => 6,
    }
}
