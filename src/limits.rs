use crate::model::Ms;

/// Longest accepted parking-lot name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// Upper bound on spots created by a single request.
pub const MAX_SPOTS_PER_REQUEST: u32 = 1_000;

pub const MAX_LOTS: usize = 10_000;
pub const MAX_SPOTS: usize = 1_000_000;

/// Appointments (of any state) retained per spot.
pub const MAX_APPOINTMENTS_PER_SPOT: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single appointment may not span more than a year.
pub const MAX_WINDOW_MS: Ms = 366 * 24 * 3_600_000;
