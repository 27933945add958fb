//! Service-day semantics shared by the segment query (C3) and the fusion
//! matcher (C4): converting a wall-clock instant into effective seconds and
//! an operating calendar (§3, §4.3, GLOSSARY).

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};

use crate::timetable::ServiceType;

/// Seconds from local midnight to the service-day epoch (04:00).
const SERVICE_DAY_EPOCH_SECS: i64 = 4 * 3600;
const SECONDS_PER_DAY: i64 = 86_400;

/// The service day a wall-clock instant belongs to, its effective-seconds
/// offset within that day, and the operating calendar in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceMoment {
    pub service_date: NaiveDate,
    pub effective_seconds: i64,
    pub calendar: ServiceType,
}

/// Resolve `at` (a UTC instant) against `tz`, rolling times before 04:00
/// local back onto the previous service day (§3 Service day).
pub fn resolve(at: DateTime<Utc>, tz: chrono_tz::Tz, holidays: &[NaiveDate]) -> ServiceMoment {
    let local = at.with_timezone(&tz);
    let local_date = local.date_naive();
    let seconds_since_midnight = local.time().num_seconds_from_midnight() as i64;

    let (service_date, effective_seconds) = if seconds_since_midnight < SERVICE_DAY_EPOCH_SECS {
        (local_date.pred_opt().unwrap_or(local_date), seconds_since_midnight - SERVICE_DAY_EPOCH_SECS + SECONDS_PER_DAY)
    } else {
        (local_date, seconds_since_midnight - SERVICE_DAY_EPOCH_SECS)
    };

    let calendar = calendar_for_date(service_date, holidays);
    ServiceMoment { service_date, effective_seconds, calendar }
}

fn calendar_for_date(date: NaiveDate, holidays: &[NaiveDate]) -> ServiceType {
    if holidays.contains(&date) {
        return ServiceType::SaturdayHoliday;
    }
    match date.weekday() {
        Weekday::Sat | Weekday::Sun => ServiceType::SaturdayHoliday,
        _ => ServiceType::Weekday,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn daytime_instant_uses_same_service_date() {
        let at = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap().with_timezone(&Utc);
        let moment = resolve(at, chrono_tz::Asia::Tokyo, &[]);
        assert_eq!(moment.service_date, NaiveDate::from_ymd_opt(2026, 7, 27).unwrap());
        assert_eq!(moment.effective_seconds, 6 * 3600);
    }

    #[test]
    fn past_midnight_instant_belongs_to_previous_service_day() {
        let at = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2026, 7, 28, 0, 5, 0).unwrap().with_timezone(&Utc);
        let moment = resolve(at, chrono_tz::Asia::Tokyo, &[]);
        assert_eq!(moment.service_date, NaiveDate::from_ymd_opt(2026, 7, 27).unwrap());
        // 00:05 local -> effective 24:05 of the previous service day.
        assert_eq!(moment.effective_seconds, 24 * 3600 + 300 - 4 * 3600);
    }

    #[test]
    fn saturday_is_saturday_holiday_calendar() {
        // 2026-08-01 is a Saturday.
        let at = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2026, 8, 1, 10, 0, 0).unwrap().with_timezone(&Utc);
        let moment = resolve(at, chrono_tz::Asia::Tokyo, &[]);
        assert_eq!(moment.calendar, ServiceType::SaturdayHoliday);
    }

    #[test]
    fn configured_holiday_overrides_weekday() {
        let at = chrono_tz::Asia::Tokyo.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap().with_timezone(&Utc);
        let holidays = vec![NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()];
        let moment = resolve(at, chrono_tz::Asia::Tokyo, &holidays);
        assert_eq!(moment.calendar, ServiceType::SaturdayHoliday);
    }
}
