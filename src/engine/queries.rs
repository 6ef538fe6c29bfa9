use ulid::Ulid;

use crate::model::*;

use super::conflict::{active_overlapping, is_free, validate_window};
use super::{Engine, EngineError};

impl Engine {
    /// True when no valid appointment on the spot intersects `window`.
    pub async fn is_available(&self, spot_id: Ulid, window: Window) -> Result<bool, EngineError> {
        let rs = self
            .store
            .get_spot(&spot_id)
            .ok_or_else(|| EngineError::RecordNotFound(format!("vehicle spot {spot_id}")))?;
        let guard = rs.read().await;
        Ok(is_free(&guard, &window))
    }

    /// Valid appointments on the spot whose window intersects `window`,
    /// ordered by start.
    pub async fn find_by_spot_and_window(&self, spot_id: Ulid, window: Window) -> Vec<Appointment> {
        let Some(rs) = self.store.get_spot(&spot_id) else {
            return Vec::new();
        };
        let guard = rs.read().await;
        active_overlapping(&guard, &window).cloned().collect()
    }

    /// Valid appointments whose window ended at or before `instant`.
    pub async fn find_valid_expiring_before(&self, instant: Ms) -> Vec<Appointment> {
        let mut due = Vec::new();
        for spot_id in self.store.spot_ids() {
            let Some(rs) = self.store.get_spot(&spot_id) else {
                continue;
            };
            let guard = rs.read().await;
            due.extend(
                guard
                    .appointments
                    .iter()
                    .filter(|a| a.is_active() && a.window.elapsed_at(instant))
                    .cloned(),
            );
        }
        due
    }

    /// Spots of `category`, across all lots, free for the whole window.
    /// Ordered by spot id, which is creation order.
    pub async fn list_available_by_category(
        &self,
        category: Category,
        window: Window,
    ) -> Result<Vec<VehicleSpot>, EngineError> {
        validate_window(&window)?;
        let mut free = Vec::new();
        for spot_id in self.store.spot_ids() {
            let Some(rs) = self.store.get_spot(&spot_id) else {
                continue;
            };
            let guard = rs.read().await;
            if guard.spot.category == category && is_free(&guard, &window) {
                free.push(guard.spot.clone());
            }
        }
        Ok(free)
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let not_found = || EngineError::RecordNotFound(format!("appointment {id}"));
        let spot_id = self.store.spot_for_appointment(&id).ok_or_else(not_found)?;
        let rs = self.store.get_spot(&spot_id).ok_or_else(not_found)?;
        let guard = rs.read().await;
        guard.appointment(id).cloned().ok_or_else(not_found)
    }

    /// All appointments in booking order.
    pub async fn list_appointments(&self) -> Vec<Appointment> {
        let mut all = Vec::with_capacity(self.store.appointment_count());
        for spot_id in self.store.spot_ids() {
            let Some(rs) = self.store.get_spot(&spot_id) else {
                continue;
            };
            let guard = rs.read().await;
            all.extend(guard.appointments.iter().cloned());
        }
        all.sort_by_key(|a| a.id);
        all
    }

    pub fn list_lots(&self) -> Vec<ParkingLot> {
        self.store
            .lot_ids()
            .iter()
            .filter_map(|id| self.store.lot(id))
            .collect()
    }

    pub fn get_lot(&self, name: &str) -> Result<ParkingLot, EngineError> {
        self.lot_named(name)
    }

    pub async fn list_spots(&self) -> Vec<VehicleSpot> {
        let mut spots = Vec::with_capacity(self.store.spot_count());
        for spot_id in self.store.spot_ids() {
            if let Some(rs) = self.store.get_spot(&spot_id) {
                spots.push(rs.read().await.spot.clone());
            }
        }
        spots
    }

    /// Spots of one lot in the order they joined it.
    pub async fn spots_in_lot(&self, lot_name: &str) -> Result<Vec<VehicleSpot>, EngineError> {
        let lot = self.lot_named(lot_name)?;
        let mut spots = Vec::new();
        for spot_id in self.store.spots_in_lot(&lot.id) {
            if let Some(rs) = self.store.get_spot(&spot_id) {
                spots.push(rs.read().await.spot.clone());
            }
        }
        Ok(spots)
    }

    pub async fn get_spot_info(&self, spot_id: Ulid) -> Result<VehicleSpot, EngineError> {
        let rs = self
            .store
            .get_spot(&spot_id)
            .ok_or_else(|| EngineError::RecordNotFound(format!("vehicle spot {spot_id}")))?;
        let spot = rs.read().await.spot.clone();
        Ok(spot)
    }

    /// Latest capacity change per lot.
    pub fn capacity_changes(&self) -> Vec<CapacityChange> {
        self.store.capacity_changes()
    }
}
