//! Wall-clock conversion at the request boundary.
//!
//! Clients send `dd/MM/yyyy HH:mm` in a named zone; the engine only ever sees
//! UTC milliseconds.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::engine::EngineError;
use crate::model::{Ms, Window};

pub const DATE_FORMAT: &str = "%d/%m/%Y %H:%M";
pub const DEFAULT_ZONE: Tz = chrono_tz::Europe::Rome;

pub fn parse_zone(zone_id: &str) -> Result<Tz, EngineError> {
    zone_id
        .trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimeZone(zone_id.to_string()))
}

/// Zone from an optional id, falling back to `default`.
pub fn zone_or(zone_id: Option<&str>, default: Tz) -> Result<Tz, EngineError> {
    match zone_id {
        Some(id) if !id.trim().is_empty() => parse_zone(id),
        _ => Ok(default),
    }
}

pub fn parse_local(text: &str) -> Result<NaiveDateTime, EngineError> {
    NaiveDateTime::parse_from_str(text.trim(), DATE_FORMAT)
        .map_err(|_| EngineError::InvalidDateFormat(text.to_string()))
}

/// Interpret `local` as wall clock in `zone`. A time skipped by a DST jump
/// does not exist and fails; a repeated time resolves to its first instant.
pub fn to_utc(local: NaiveDateTime, zone: Tz) -> Result<Ms, EngineError> {
    zone.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.timestamp_millis())
        .ok_or(EngineError::InvalidDateRange)
}

pub fn to_zone(ms: Ms, zone: Tz) -> Result<NaiveDateTime, EngineError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.with_timezone(&zone).naive_local())
        .ok_or(EngineError::TimestampOutOfRange(ms))
}

pub fn format_local(ms: Ms, zone: Tz) -> Result<String, EngineError> {
    Ok(to_zone(ms, zone)?.format(DATE_FORMAT).to_string())
}

/// Chronological sanity of a requested window, checked on the client's own
/// wall clock: `start` after the current time in `zone`, `end` after `start`.
pub fn validate_window(start: NaiveDateTime, end: NaiveDateTime, zone: Tz, now: Ms) -> bool {
    let Ok(now_local) = to_zone(now, zone) else {
        return false;
    };
    start > now_local && end > start
}

/// Parse, validate and convert a local window in one step.
pub fn local_window(
    start: &str,
    end: &str,
    zone: Tz,
    now: Ms,
) -> Result<Window, EngineError> {
    let start = parse_local(start)?;
    let end = parse_local(end)?;
    if !validate_window(start, end, zone, now) {
        return Err(EngineError::InvalidDateRange);
    }
    let (start, end) = (to_utc(start, zone)?, to_utc(end, zone)?);
    // A fall-back repeat can fold a valid local window onto itself.
    Window::try_new(start, end).ok_or(EngineError::InvalidDateRange)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn utc_ms(y: i32, m: u32, d: u32, h: u32, min: u32) -> Ms {
        Utc.from_utc_datetime(&local(y, m, d, h, min)).timestamp_millis()
    }

    #[test]
    fn parses_boundary_format() {
        assert_eq!(parse_local("01/06/2025 10:30").unwrap(), local(2025, 6, 1, 10, 30));
        assert_eq!(parse_local(" 01/06/2025 10:30 ").unwrap(), local(2025, 6, 1, 10, 30));
        assert!(matches!(
            parse_local("2025-06-01 10:30"),
            Err(EngineError::InvalidDateFormat(_))
        ));
        assert!(matches!(
            parse_local("31/02/2025 10:30"),
            Err(EngineError::InvalidDateFormat(_))
        ));
    }

    #[test]
    fn zone_lookup() {
        assert_eq!(parse_zone("Europe/Rome").unwrap(), chrono_tz::Europe::Rome);
        assert!(matches!(parse_zone("Mars/Olympus"), Err(EngineError::InvalidTimeZone(_))));
        assert_eq!(zone_or(None, DEFAULT_ZONE).unwrap(), DEFAULT_ZONE);
        assert_eq!(zone_or(Some("  "), DEFAULT_ZONE).unwrap(), DEFAULT_ZONE);
        assert_eq!(zone_or(Some("UTC"), DEFAULT_ZONE).unwrap(), chrono_tz::UTC);
    }

    #[test]
    fn rome_summer_is_utc_plus_two() {
        let ms = to_utc(local(2025, 6, 1, 10, 0), DEFAULT_ZONE).unwrap();
        assert_eq!(ms, utc_ms(2025, 6, 1, 8, 0));
        assert_eq!(format_local(ms, DEFAULT_ZONE).unwrap(), "01/06/2025 10:00");
    }

    #[test]
    fn round_trip_over_a_year() {
        let zones = [
            DEFAULT_ZONE,
            chrono_tz::America::New_York,
            chrono_tz::Asia::Kolkata,
            chrono_tz::UTC,
        ];
        for zone in zones {
            let mut t = local(2025, 1, 1, 0, 15);
            while t < local(2026, 1, 1, 0, 0) {
                // Skip the hour around DST switches: gaps and repeats do not round-trip.
                if zone.from_local_datetime(&t).single().is_some() {
                    let back = to_zone(to_utc(t, zone).unwrap(), zone).unwrap();
                    assert_eq!(back, t, "zone {zone}");
                }
                t += Duration::minutes(97);
            }
        }
    }

    #[test]
    fn dst_gap_is_rejected() {
        // 30/03/2025 02:30 does not exist in Rome.
        assert!(matches!(
            to_utc(local(2025, 3, 30, 2, 30), DEFAULT_ZONE),
            Err(EngineError::InvalidDateRange)
        ));
    }

    #[test]
    fn dst_repeat_takes_first_instant() {
        // 26/10/2025 02:30 happens twice in Rome; the first is still UTC+2.
        let ms = to_utc(local(2025, 10, 26, 2, 30), DEFAULT_ZONE).unwrap();
        assert_eq!(ms, utc_ms(2025, 10, 26, 0, 30));
    }

    #[test]
    fn window_validation_uses_zone_clock() {
        let now = utc_ms(2025, 6, 1, 8, 0); // 10:00 in Rome
        let zone = DEFAULT_ZONE;
        assert!(validate_window(local(2025, 6, 1, 10, 1), local(2025, 6, 1, 11, 0), zone, now));
        assert!(!validate_window(local(2025, 6, 1, 10, 0), local(2025, 6, 1, 11, 0), zone, now));
        assert!(!validate_window(local(2025, 6, 1, 9, 0), local(2025, 6, 1, 11, 0), zone, now));
        assert!(!validate_window(local(2025, 6, 1, 12, 0), local(2025, 6, 1, 12, 0), zone, now));
        assert!(!validate_window(local(2025, 6, 1, 12, 0), local(2025, 6, 1, 11, 0), zone, now));
        // 09:30 is already past in Rome but still ahead in New York.
        assert!(validate_window(
            local(2025, 6, 1, 9, 30),
            local(2025, 6, 1, 11, 0),
            chrono_tz::America::New_York,
            now
        ));
    }

    #[test]
    fn local_window_converts() {
        let now = utc_ms(2025, 6, 1, 0, 0);
        let w = local_window("01/06/2025 10:00", "01/06/2025 11:00", DEFAULT_ZONE, now).unwrap();
        assert_eq!(w, Window::new(utc_ms(2025, 6, 1, 8, 0), utc_ms(2025, 6, 1, 9, 0)));
        assert!(matches!(
            local_window("01/06/2025 11:00", "01/06/2025 10:00", DEFAULT_ZONE, now),
            Err(EngineError::InvalidDateRange)
        ));
        assert!(matches!(
            local_window("bad", "01/06/2025 10:00", DEFAULT_ZONE, now),
            Err(EngineError::InvalidDateFormat(_))
        ));
    }
}
