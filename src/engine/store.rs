use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedSpotState;

/// In-memory indexes over lots, spots and appointments.
///
/// Appointments live inside their spot's `SpotState`, so a spot's write lock
/// covers every booking decision for that spot.
pub struct Store {
    lots: DashMap<Ulid, ParkingLot>,
    lot_names: DashMap<String, Ulid>,
    /// Spots of each lot in the order they joined it.
    lot_spots: DashMap<Ulid, Vec<Ulid>>,
    spots: DashMap<Ulid, SharedSpotState>,
    appointment_to_spot: DashMap<Ulid, Ulid>,
    capacity_changes: DashMap<Ulid, CapacityChange>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            lots: DashMap::new(),
            lot_names: DashMap::new(),
            lot_spots: DashMap::new(),
            spots: DashMap::new(),
            appointment_to_spot: DashMap::new(),
            capacity_changes: DashMap::new(),
        }
    }

    // ── Lots ─────────────────────────────────────────────────

    pub fn lot_count(&self) -> usize {
        self.lots.len()
    }

    pub fn lot(&self, id: &Ulid) -> Option<ParkingLot> {
        self.lots.get(id).map(|e| e.value().clone())
    }

    pub fn lot_by_name(&self, name: &str) -> Option<ParkingLot> {
        let id = *self.lot_names.get(name)?.value();
        self.lot(&id)
    }

    /// Lot ids in creation order.
    pub fn lot_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.lots.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn capacity_change(&self, lot_id: &Ulid) -> Option<CapacityChange> {
        self.capacity_changes.get(lot_id).map(|e| e.value().clone())
    }

    pub fn capacity_changes(&self) -> Vec<CapacityChange> {
        let mut changes: Vec<CapacityChange> =
            self.capacity_changes.iter().map(|e| e.value().clone()).collect();
        changes.sort_by_key(|c| c.lot_id);
        changes
    }

    // ── Spots ────────────────────────────────────────────────

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn contains_spot(&self, id: &Ulid) -> bool {
        self.spots.contains_key(id)
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    /// Spot ids in creation order.
    pub fn spot_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.spots.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn spots_in_lot(&self, lot_id: &Ulid) -> Vec<Ulid> {
        self.lot_spots
            .get(lot_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    pub fn spots_in_lot_count(&self, lot_id: &Ulid) -> usize {
        self.lot_spots.get(lot_id).map_or(0, |e| e.value().len())
    }

    // ── Appointment index ────────────────────────────────────

    pub fn spot_for_appointment(&self, appointment_id: &Ulid) -> Option<Ulid> {
        self.appointment_to_spot.get(appointment_id).map(|e| *e.value())
    }

    pub fn appointment_count(&self) -> usize {
        self.appointment_to_spot.len()
    }

    // ── Event application ────────────────────────────────────

    /// Apply an event that touches no spot state: lot changes and spot creation.
    pub fn apply_catalog(&self, event: &Event) {
        match event {
            Event::LotCreated {
                id,
                name,
                vehicle_spot_number,
            } => {
                self.lots.insert(
                    *id,
                    ParkingLot {
                        id: *id,
                        name: name.clone(),
                        vehicle_spot_number: *vehicle_spot_number,
                    },
                );
                self.lot_names.insert(name.clone(), *id);
                self.lot_spots.entry(*id).or_default();
            }
            Event::LotCapacityChanged {
                id,
                old_capacity,
                new_capacity,
                changed_at,
            } => {
                let Some(mut lot) = self.lots.get_mut(id) else {
                    return;
                };
                lot.vehicle_spot_number = *new_capacity;
                let change = CapacityChange {
                    lot_id: *id,
                    lot_name: lot.name.clone(),
                    old_capacity: *old_capacity,
                    new_capacity: *new_capacity,
                    changed_at: *changed_at,
                };
                drop(lot);
                self.capacity_changes.insert(*id, change);
            }
            Event::LotDeleted { id } => {
                if let Some((_, lot)) = self.lots.remove(id) {
                    self.lot_names.remove(&lot.name);
                }
                self.lot_spots.remove(id);
                self.capacity_changes.remove(id);
            }
            Event::SpotCreated {
                id,
                lot_id,
                category,
            } => {
                let Some(lot_name) = self.lots.get(lot_id).map(|l| l.name.clone()) else {
                    return;
                };
                let spot = VehicleSpot {
                    id: *id,
                    lot_id: *lot_id,
                    lot_name,
                    category: *category,
                };
                self.spots
                    .insert(*id, Arc::new(RwLock::new(SpotState::new(spot))));
                self.lot_spots.entry(*lot_id).or_default().push(*id);
            }
            // Everything else needs the spot's lock and goes through apply_to_spot.
            _ => {}
        }
    }

    /// Apply a spot-scoped event. The caller holds the spot's write lock.
    pub fn apply_to_spot(&self, rs: &mut SpotState, event: &Event) {
        match event {
            Event::SpotUpdated { category, .. } => {
                rs.spot.category = *category;
            }
            Event::SpotMoved { id, lot_id } => {
                let Some(lot_name) = self.lots.get(lot_id).map(|l| l.name.clone()) else {
                    return;
                };
                if let Some(mut kids) = self.lot_spots.get_mut(&rs.spot.lot_id) {
                    kids.retain(|s| s != id);
                }
                self.lot_spots.entry(*lot_id).or_default().push(*id);
                rs.spot.lot_id = *lot_id;
                rs.spot.lot_name = lot_name;
            }
            Event::SpotDeleted { id } => {
                for a in rs.appointments.drain(..) {
                    self.appointment_to_spot.remove(&a.id);
                }
                if let Some(mut kids) = self.lot_spots.get_mut(&rs.spot.lot_id) {
                    kids.retain(|s| s != id);
                }
                self.spots.remove(id);
            }
            Event::AppointmentBooked { appointment } => {
                self.appointment_to_spot
                    .insert(appointment.id, appointment.spot_id);
                rs.insert_appointment(appointment.clone());
            }
            Event::AppointmentUpdated {
                id,
                category,
                window,
                ..
            } => {
                if let Some(mut a) = rs.remove_appointment(*id) {
                    a.category = *category;
                    a.window = *window;
                    rs.insert_appointment(a);
                }
            }
            Event::AppointmentCanceled { id, .. } => {
                transition(rs, *id, AppointmentState::Canceled);
            }
            Event::AppointmentExpired { id, .. } => {
                transition(rs, *id, AppointmentState::Expired);
            }
            Event::AppointmentDeleted { id, .. } => {
                rs.remove_appointment(*id);
                self.appointment_to_spot.remove(id);
            }
            Event::LotCreated { .. }
            | Event::LotCapacityChanged { .. }
            | Event::LotDeleted { .. }
            | Event::SpotCreated { .. } => {}
        }
    }
}

/// Move an appointment to a terminal state. Illegal transitions are dropped.
fn transition(rs: &mut SpotState, id: Ulid, next: AppointmentState) {
    if let Some(a) = rs.appointment_mut(id)
        && a.state.can_become(next)
    {
        a.state = next;
    }
}
