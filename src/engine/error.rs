use ulid::Ulid;

use crate::model::{Category, Ms};

#[derive(Debug)]
pub enum EngineError {
    /// Window is not in the future or does not end after it starts.
    InvalidDateRange,
    InvalidDateFormat(String),
    InvalidTimeZone(String),
    UnknownCategory(String),
    NoAvailableSpot {
        lot_name: String,
        category: Category,
    },
    /// Names the missing record, e.g. `appointment 01J...`.
    RecordNotFound(String),
    /// The patch carries no field that differs from the stored record.
    NoOpUpdate,
    /// Window collides with this valid appointment on the same spot.
    Conflict(Ulid),
    AlreadyExists(String),
    CapacityExceeded {
        lot_name: String,
        remaining: u32,
    },
    AlreadyInLot {
        spot_id: Ulid,
        lot_name: String,
    },
    /// Spot still has valid appointments.
    SpotInUse(Ulid),
    LimitExceeded(&'static str),
    TimestampOutOfRange(Ms),
    PersistenceFailure(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDateRange => {
                write!(f, "invalid date range: start must be in the future and end must follow start")
            }
            EngineError::InvalidDateFormat(s) => {
                write!(f, "invalid date '{s}': expected dd/MM/yyyy HH:mm")
            }
            EngineError::InvalidTimeZone(z) => write!(f, "unknown time zone: {z}"),
            EngineError::UnknownCategory(c) => write!(
                f,
                "invalid category '{c}', valid categories: {}",
                Category::valid_names()
            ),
            EngineError::NoAvailableSpot { lot_name, category } => write!(
                f,
                "no available spot for category '{category}' in parking lot '{lot_name}'"
            ),
            EngineError::RecordNotFound(what) => write!(f, "record not found: {what}"),
            EngineError::NoOpUpdate => {
                write!(f, "update rejected: the patch is empty or the record is already up to date")
            }
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::AlreadyExists(name) => write!(f, "already exists: {name}"),
            EngineError::CapacityExceeded { lot_name, remaining } => write!(
                f,
                "parking lot '{lot_name}' is at capacity: {remaining} spots can still be added"
            ),
            EngineError::AlreadyInLot { spot_id, lot_name } => {
                write!(f, "spot {spot_id} is already assigned to parking lot '{lot_name}'")
            }
            EngineError::SpotInUse(id) => {
                write!(f, "spot {id} still has valid appointments")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::TimestampOutOfRange(ms) => write!(f, "timestamp out of range: {ms}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
