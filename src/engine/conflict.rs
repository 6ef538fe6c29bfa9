use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Range checks on a UTC window before it reaches a spot.
pub(crate) fn validate_window(window: &Window) -> Result<(), EngineError> {
    if window.start < MIN_VALID_TIMESTAMP_MS {
        return Err(EngineError::TimestampOutOfRange(window.start));
    }
    if window.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::TimestampOutOfRange(window.end));
    }
    if window.duration_ms() > MAX_WINDOW_MS {
        return Err(EngineError::LimitExceeded("appointment window too wide"));
    }
    Ok(())
}

/// Valid appointments on the spot that intersect `window`:
/// `existing.start <= window.end && existing.end >= window.start`.
pub(crate) fn active_overlapping<'a>(
    rs: &'a SpotState,
    window: &'a Window,
) -> impl Iterator<Item = &'a Appointment> + 'a {
    rs.overlapping(window).filter(|a| a.is_active())
}

pub(crate) fn is_free(rs: &SpotState, window: &Window) -> bool {
    active_overlapping(rs, window).next().is_none()
}

/// Like `is_free`, but reports the blocking appointment and can ignore one
/// appointment (the one being rescheduled).
pub(crate) fn check_no_conflict(
    rs: &SpotState,
    window: &Window,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match active_overlapping(rs, window).find(|a| Some(a.id) != exclude) {
        Some(blocking) => Err(EngineError::Conflict(blocking.id)),
        None => Ok(()),
    }
}
