//! Field-level partial updates.
//!
//! A patch is a struct of `Option` fields, one per patchable field of its
//! target. `None` leaves the field untouched. [`merge`] writes only the
//! present fields whose value differs from the current record and rejects a
//! patch that would change nothing.
//!
//! Appointment state is not a patchable field: it only moves through cancel
//! and the expiration sweep.

use crate::engine::EngineError;
use crate::model::{Appointment, Category, Ms, ParkingLot, VehicleSpot};

pub trait Patch {
    type Target: Clone;

    /// Write every present field that differs from `target`.
    /// Returns the names of the fields that were written.
    fn apply_to(&self, target: &mut Self::Target) -> Vec<&'static str>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Merged<T> {
    pub value: T,
    pub changed: Vec<&'static str>,
}

impl<T> Merged<T> {
    pub fn touched(&self, field: &str) -> bool {
        self.changed.iter().any(|c| *c == field)
    }
}

pub fn merge<P: Patch>(current: &P::Target, patch: &P) -> Result<Merged<P::Target>, EngineError> {
    let mut value = current.clone();
    let changed = patch.apply_to(&mut value);
    if changed.is_empty() {
        return Err(EngineError::NoOpUpdate);
    }
    Ok(Merged { value, changed })
}

/// Overwrite `slot` with the patch value when it is present and different.
pub fn set_if_changed<T: PartialEq + Clone>(slot: &mut T, value: &Option<T>) -> bool {
    match value {
        Some(v) if *v != *slot => {
            *slot = v.clone();
            true
        }
        _ => false,
    }
}

/// Patchable appointment fields. Times are UTC.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentPatch {
    pub category: Option<Category>,
    pub start: Option<Ms>,
    pub end: Option<Ms>,
}

impl Patch for AppointmentPatch {
    type Target = Appointment;

    fn apply_to(&self, a: &mut Appointment) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if set_if_changed(&mut a.category, &self.category) {
            changed.push("category");
        }
        if set_if_changed(&mut a.window.start, &self.start) {
            changed.push("start");
        }
        if set_if_changed(&mut a.window.end, &self.end) {
            changed.push("end");
        }
        changed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpotPatch {
    pub category: Option<Category>,
}

impl Patch for SpotPatch {
    type Target = VehicleSpot;

    fn apply_to(&self, spot: &mut VehicleSpot) -> Vec<&'static str> {
        if set_if_changed(&mut spot.category, &self.category) {
            vec!["category"]
        } else {
            Vec::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LotPatch {
    pub vehicle_spot_number: Option<u32>,
}

impl Patch for LotPatch {
    type Target = ParkingLot;

    fn apply_to(&self, lot: &mut ParkingLot) -> Vec<&'static str> {
        if set_if_changed(&mut lot.vehicle_spot_number, &self.vehicle_spot_number) {
            vec!["vehicle_spot_number"]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppointmentState, Window};
    use ulid::Ulid;

    fn appointment() -> Appointment {
        Appointment {
            id: Ulid::new(),
            spot_id: Ulid::new(),
            lot_id: Ulid::new(),
            lot_name: "Fiera".into(),
            window: Window::new(1_000, 2_000),
            category: Category::Vip,
            state: AppointmentState::Valid,
        }
    }

    #[test]
    fn empty_patch_is_noop() {
        let a = appointment();
        let err = merge(&a, &AppointmentPatch::default()).unwrap_err();
        assert!(matches!(err, EngineError::NoOpUpdate));
    }

    #[test]
    fn patch_equal_to_current_is_noop() {
        let a = appointment();
        let patch = AppointmentPatch {
            category: Some(Category::Vip),
            start: Some(1_000),
            end: Some(2_000),
        };
        assert!(matches!(merge(&a, &patch), Err(EngineError::NoOpUpdate)));
    }

    #[test]
    fn only_differing_field_is_written() {
        let a = appointment();
        let patch = AppointmentPatch {
            category: Some(Category::Electric),
            start: Some(1_000),
            end: None,
        };
        let merged = merge(&a, &patch).unwrap();
        assert_eq!(merged.changed, vec!["category"]);
        assert!(merged.touched("category"));
        assert!(!merged.touched("start"));
        assert_eq!(merged.value.category, Category::Electric);
        assert_eq!(merged.value.window, a.window);
        assert_eq!(merged.value.state, a.state);
        assert_eq!(merged.value.spot_id, a.spot_id);
    }

    #[test]
    fn merge_leaves_current_untouched() {
        let a = appointment();
        let before = a.clone();
        let _ = merge(
            &a,
            &AppointmentPatch {
                end: Some(5_000),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(a, before);
    }

    #[test]
    fn lot_capacity_patch() {
        let lot = ParkingLot {
            id: Ulid::new(),
            name: "Darsena".into(),
            vehicle_spot_number: 20,
        };
        let same = LotPatch {
            vehicle_spot_number: Some(20),
        };
        assert!(matches!(merge(&lot, &same), Err(EngineError::NoOpUpdate)));
        let grow = LotPatch {
            vehicle_spot_number: Some(30),
        };
        assert_eq!(merge(&lot, &grow).unwrap().value.vehicle_spot_number, 30);
    }

    #[test]
    fn spot_category_patch() {
        let spot = VehicleSpot {
            id: Ulid::new(),
            lot_id: Ulid::new(),
            lot_name: "Darsena".into(),
            category: Category::Standard,
        };
        let merged = merge(
            &spot,
            &SpotPatch {
                category: Some(Category::Disable),
            },
        )
        .unwrap();
        assert_eq!(merged.value.category, Category::Disable);
        assert_eq!(merged.value.lot_id, spot.lot_id);
    }
}
