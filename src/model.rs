use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, UTC. The only time type past the request boundary.
pub type Ms = i64;

/// Booking window with closed bounds `[start, end]`.
///
/// Two windows that only touch at a boundary instant still overlap, so a
/// booking ending at 11:00 blocks another starting at 11:00 on the same spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: Ms,
    pub end: Ms,
}

impl Window {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Window start must be before end");
        Self { start, end }
    }

    /// Like `new`, but rejects empty or inverted windows instead of asserting.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    /// True once the window's end is at or before `now`.
    pub fn elapsed_at(&self, now: Ms) -> bool {
        self.end <= now
    }
}

/// Fixed set of spot categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Category {
    Standard,
    Disable,
    Vip,
    Electric,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Standard,
        Category::Disable,
        Category::Vip,
        Category::Electric,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Category::Standard => "STANDARD",
            Category::Disable => "DISABLE",
            Category::Vip => "VIP",
            Category::Electric => "ELECTRIC",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
    }

    pub fn valid_names() -> String {
        let names: Vec<&str> = Self::ALL.iter().map(|c| c.name()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Appointment lifecycle. `Valid` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentState {
    Valid,
    Canceled,
    Expired,
}

impl AppointmentState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentState::Valid)
    }

    /// The full transition table: `Valid -> Canceled` and `Valid -> Expired`.
    pub fn can_become(&self, next: AppointmentState) -> bool {
        matches!(
            (self, next),
            (AppointmentState::Valid, AppointmentState::Canceled)
                | (AppointmentState::Valid, AppointmentState::Expired)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            AppointmentState::Valid => "VALID",
            AppointmentState::Canceled => "CANCELED",
            AppointmentState::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for AppointmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One spot reserved for one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Ulid,
    pub spot_id: Ulid,
    pub lot_id: Ulid,
    /// Copy of the owning lot's name at booking time.
    pub lot_name: String,
    pub window: Window,
    pub category: Category,
    pub state: AppointmentState,
}

impl Appointment {
    /// Only valid appointments occupy their spot.
    pub fn is_active(&self) -> bool {
        self.state == AppointmentState::Valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleSpot {
    pub id: Ulid,
    pub lot_id: Ulid,
    pub lot_name: String,
    pub category: Category,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkingLot {
    pub id: Ulid,
    pub name: String,
    /// Declared capacity. Checked when spots are created or moved in, never when booking.
    pub vehicle_spot_number: u32,
}

/// Latest capacity edit of a lot. One record per lot, overwritten on each edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityChange {
    pub lot_id: Ulid,
    pub lot_name: String,
    pub old_capacity: u32,
    pub new_capacity: u32,
    pub changed_at: Ms,
}

/// A spot together with every appointment ever booked on it.
#[derive(Debug, Clone)]
pub struct SpotState {
    pub spot: VehicleSpot,
    /// Sorted by `window.start`.
    pub appointments: Vec<Appointment>,
}

impl SpotState {
    pub fn new(spot: VehicleSpot) -> Self {
        Self {
            spot,
            appointments: Vec::new(),
        }
    }

    /// Insert keeping the list ordered by window start.
    pub fn insert_appointment(&mut self, appointment: Appointment) {
        let pos = self
            .appointments
            .partition_point(|a| a.window.start <= appointment.window.start);
        self.appointments.insert(pos, appointment);
    }

    pub fn remove_appointment(&mut self, id: Ulid) -> Option<Appointment> {
        let pos = self.appointments.iter().position(|a| a.id == id)?;
        Some(self.appointments.remove(pos))
    }

    pub fn appointment(&self, id: Ulid) -> Option<&Appointment> {
        self.appointments.iter().find(|a| a.id == id)
    }

    pub fn appointment_mut(&mut self, id: Ulid) -> Option<&mut Appointment> {
        self.appointments.iter_mut().find(|a| a.id == id)
    }

    /// Appointments (any state) whose window overlaps `query` under closed bounds.
    /// Everything starting after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &Window) -> impl Iterator<Item = &Appointment> {
        let right_bound = self
            .appointments
            .partition_point(|a| a.window.start <= query.end);
        self.appointments[..right_bound]
            .iter()
            .filter(move |a| a.window.end >= query.start)
    }

    pub fn has_active(&self) -> bool {
        self.appointments.iter().any(Appointment::is_active)
    }
}

/// WAL record format. Flat, one variant per persisted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    LotCreated {
        id: Ulid,
        name: String,
        vehicle_spot_number: u32,
    },
    LotCapacityChanged {
        id: Ulid,
        old_capacity: u32,
        new_capacity: u32,
        changed_at: Ms,
    },
    LotDeleted {
        id: Ulid,
    },
    SpotCreated {
        id: Ulid,
        lot_id: Ulid,
        category: Category,
    },
    SpotUpdated {
        id: Ulid,
        category: Category,
    },
    SpotMoved {
        id: Ulid,
        lot_id: Ulid,
    },
    SpotDeleted {
        id: Ulid,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    AppointmentUpdated {
        id: Ulid,
        spot_id: Ulid,
        category: Category,
        window: Window,
    },
    AppointmentCanceled {
        id: Ulid,
        spot_id: Ulid,
    },
    AppointmentExpired {
        id: Ulid,
        spot_id: Ulid,
    },
    AppointmentDeleted {
        id: Ulid,
        spot_id: Ulid,
    },
}

impl Event {
    /// Spot whose lock must be held to apply this event, if any.
    pub fn spot_id(&self) -> Option<Ulid> {
        match self {
            Event::SpotUpdated { id, .. } | Event::SpotMoved { id, .. } | Event::SpotDeleted { id } => {
                Some(*id)
            }
            Event::AppointmentBooked { appointment } => Some(appointment.spot_id),
            Event::AppointmentUpdated { spot_id, .. }
            | Event::AppointmentCanceled { spot_id, .. }
            | Event::AppointmentExpired { spot_id, .. }
            | Event::AppointmentDeleted { spot_id, .. } => Some(*spot_id),
            Event::LotCreated { .. }
            | Event::LotCapacityChanged { .. }
            | Event::LotDeleted { .. }
            | Event::SpotCreated { .. } => None,
        }
    }
}
