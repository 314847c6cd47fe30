// libs/availability-cell/src/services/clock.rs
//
// All domain math runs on UTC instants; wall-clock time only appears when
// interpreting availability templates and rendering. This service owns the
// single DST policy: non-existent local times shift forward to the next
// valid instant, ambiguous local times take the earlier offset.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::models::AvailabilityError;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock for tests.
#[derive(Debug, Clone)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// How a wall-clock time was resolved to an instant across a DST edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallClockAdjustment {
    /// Unambiguous local time.
    Exact,
    /// The local time did not exist (spring-forward gap); shifted to the
    /// next valid instant.
    ShiftedForward,
    /// The local time occurred twice (fall-back overlap); earlier offset
    /// chosen.
    EarlierOfAmbiguous,
}

#[derive(Debug, Clone, Copy)]
pub struct ResolvedInstant {
    pub instant: DateTime<Utc>,
    pub adjustment: WallClockAdjustment,
}

pub struct ClockService;

impl ClockService {
    pub fn parse_tz(name: &str) -> Result<Tz, AvailabilityError> {
        name.parse::<Tz>()
            .map_err(|_| AvailabilityError::TimezoneUnknown(name.to_string()))
    }

    /// Civil date+time of a UTC instant in the given zone.
    pub fn to_wall(utc: DateTime<Utc>, tz: Tz) -> NaiveDateTime {
        utc.with_timezone(&tz).naive_local()
    }

    pub fn today_in(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
        now.with_timezone(&tz).date_naive()
    }

    /// UTC instant of a civil date+time, with the documented DST policy.
    /// Callers log a warning when the adjustment is not `Exact`.
    pub fn to_utc(wall: NaiveDateTime, tz: Tz) -> ResolvedInstant {
        match tz.from_local_datetime(&wall) {
            LocalResult::Single(local) => ResolvedInstant {
                instant: local.with_timezone(&Utc),
                adjustment: WallClockAdjustment::Exact,
            },
            LocalResult::Ambiguous(earlier, _later) => {
                warn!("Ambiguous local time {} in {}, using earlier offset", wall, tz);
                ResolvedInstant {
                    instant: earlier.with_timezone(&Utc),
                    adjustment: WallClockAdjustment::EarlierOfAmbiguous,
                }
            }
            LocalResult::None => {
                // Spring-forward gap. Probe forward one minute at a time
                // until a valid local time is found; DST gaps are at most a
                // few hours.
                let mut probe = wall;
                for _ in 0..240 {
                    probe += Duration::minutes(1);
                    match tz.from_local_datetime(&probe) {
                        LocalResult::Single(local) => {
                            warn!(
                                "Non-existent local time {} in {}, shifted forward to {}",
                                wall, tz, probe
                            );
                            return ResolvedInstant {
                                instant: local.with_timezone(&Utc),
                                adjustment: WallClockAdjustment::ShiftedForward,
                            };
                        }
                        LocalResult::Ambiguous(earlier, _) => {
                            return ResolvedInstant {
                                instant: earlier.with_timezone(&Utc),
                                adjustment: WallClockAdjustment::ShiftedForward,
                            };
                        }
                        LocalResult::None => continue,
                    }
                }
                // A zone with a gap longer than four hours would be broken
                // tzdata; fall back to interpreting the wall time as UTC.
                warn!("Could not resolve local time {} in {}, treating as UTC", wall, tz);
                ResolvedInstant {
                    instant: Utc.from_utc_datetime(&wall),
                    adjustment: WallClockAdjustment::ShiftedForward,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn wall(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::new(
            date.parse::<NaiveDate>().unwrap(),
            time.parse::<NaiveTime>().unwrap(),
        )
    }

    #[test]
    fn mexico_city_round_trip() {
        // Mexico abolished DST in 2022; conversions are a fixed -06:00.
        let tz = ClockService::parse_tz("America/Mexico_City").unwrap();
        let resolved = ClockService::to_utc(wall("2025-06-02", "11:00:00"), tz);
        assert_eq!(resolved.adjustment, WallClockAdjustment::Exact);
        assert_eq!(resolved.instant.to_rfc3339(), "2025-06-02T17:00:00+00:00");

        let back = ClockService::to_wall(resolved.instant, tz);
        assert_eq!(back, wall("2025-06-02", "11:00:00"));
    }

    #[test]
    fn santiago_fall_back_is_ambiguous_earlier_offset() {
        // 2025-04-05 24:00 in Chile the clock falls back from 00:00 to 23:00,
        // so 23:30 on April 5 happens twice. Policy: earlier offset (-03).
        let tz = ClockService::parse_tz("America/Santiago").unwrap();
        let resolved = ClockService::to_utc(wall("2025-04-05", "23:30:00"), tz);
        assert_eq!(resolved.adjustment, WallClockAdjustment::EarlierOfAmbiguous);
        assert_eq!(resolved.instant.to_rfc3339(), "2025-04-06T02:30:00+00:00");
    }

    #[test]
    fn santiago_spring_forward_gap_shifts_forward() {
        // 2025-09-07 Chile springs forward at 00:00 to 01:00; 00:30 does not
        // exist and resolves to the first valid instant, 01:00 -03.
        let tz = ClockService::parse_tz("America/Santiago").unwrap();
        let resolved = ClockService::to_utc(wall("2025-09-07", "00:30:00"), tz);
        assert_eq!(resolved.adjustment, WallClockAdjustment::ShiftedForward);
        assert_eq!(resolved.instant.to_rfc3339(), "2025-09-07T04:00:00+00:00");
    }

    #[test]
    fn unknown_timezone_is_an_error() {
        assert!(matches!(
            ClockService::parse_tz("America/Ciudad_Gotica"),
            Err(AvailabilityError::TimezoneUnknown(_))
        ));
    }

    #[test]
    fn today_in_respects_zone() {
        let tz = ClockService::parse_tz("America/Mexico_City").unwrap();
        // 03:00 UTC is still the previous civil day in CDMX (-06:00).
        let now = "2025-06-02T03:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(
            ClockService::today_in(now, tz),
            "2025-06-01".parse::<NaiveDate>().unwrap()
        );
    }
}
