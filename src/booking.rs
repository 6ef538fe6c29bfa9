//! Appointment operations as callers see them: local `dd/MM/yyyy HH:mm`
//! strings, a zone id and category names in, zone-local views out.
//!
//! Every input is parsed and validated here before the engine is touched, so a
//! rejected request never writes anything.

use std::sync::Arc;

use chrono_tz::Tz;
use serde::Serialize;
use ulid::Ulid;

use crate::engine::{Engine, EngineError, now_ms};
use crate::model::{Appointment, Category, VehicleSpot};
use crate::patch::AppointmentPatch;
use crate::time;

/// Appointment rendered in the caller's zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentView {
    pub id: String,
    pub spot_id: String,
    pub lot_name: String,
    pub category: Category,
    pub start: String,
    pub end: String,
    pub zone: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpotView {
    pub id: String,
    pub lot_name: String,
    pub category: Category,
}

impl From<VehicleSpot> for SpotView {
    fn from(spot: VehicleSpot) -> Self {
        Self {
            id: spot.id.to_string(),
            lot_name: spot.lot_name,
            category: spot.category,
        }
    }
}

/// Fields a caller may change on an appointment. Absent fields are kept.
#[derive(Debug, Clone, Default)]
pub struct AppointmentUpdate {
    pub category: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

pub fn parse_category(name: &str) -> Result<Category, EngineError> {
    Category::from_name(name).ok_or_else(|| EngineError::UnknownCategory(name.to_string()))
}

fn parse_appointment_id(id: &str) -> Result<Ulid, EngineError> {
    Ulid::from_string(id.trim()).map_err(|_| EngineError::RecordNotFound(format!("appointment {id}")))
}

pub struct Scheduler {
    engine: Arc<Engine>,
    default_zone: Tz,
}

impl Scheduler {
    pub fn new(engine: Arc<Engine>, default_zone: Tz) -> Self {
        Self {
            engine,
            default_zone,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn zone(&self, zone_id: Option<&str>) -> Result<Tz, EngineError> {
        time::zone_or(zone_id, self.default_zone)
    }

    fn view(&self, a: &Appointment, zone: Tz) -> Result<AppointmentView, EngineError> {
        Ok(AppointmentView {
            id: a.id.to_string(),
            spot_id: a.spot_id.to_string(),
            lot_name: a.lot_name.clone(),
            category: a.category,
            start: time::format_local(a.window.start, zone)?,
            end: time::format_local(a.window.end, zone)?,
            zone: zone.name().to_string(),
            state: a.state.name().to_string(),
        })
    }

    /// Book the first free spot of `category` in `lot_name`.
    pub async fn create_appointment(
        &self,
        lot_name: &str,
        category: &str,
        start: &str,
        end: &str,
        zone_id: Option<&str>,
    ) -> Result<AppointmentView, EngineError> {
        let zone = self.zone(zone_id)?;
        let category = parse_category(category)?;
        let window = time::local_window(start, end, zone, now_ms())?;
        let appointment = self.engine.allocate(lot_name, category, window).await?;
        self.view(&appointment, zone)
    }

    /// Spots of `category` in any lot that are free for the whole window.
    pub async fn list_available(
        &self,
        category: &str,
        start: &str,
        end: &str,
        zone_id: Option<&str>,
    ) -> Result<Vec<SpotView>, EngineError> {
        let zone = self.zone(zone_id)?;
        let category = parse_category(category)?;
        let window = time::local_window(start, end, zone, now_ms())?;
        let spots = self
            .engine
            .list_available_by_category(category, window)
            .await?;
        Ok(spots.into_iter().map(SpotView::from).collect())
    }

    pub async fn cancel_appointment(
        &self,
        id: &str,
        zone_id: Option<&str>,
    ) -> Result<AppointmentView, EngineError> {
        let zone = self.zone(zone_id)?;
        let appointment = self.engine.cancel(parse_appointment_id(id)?).await?;
        self.view(&appointment, zone)
    }

    /// Change category and/or window. When both dates are given the window
    /// must pass the same checks as a new booking.
    pub async fn update_appointment(
        &self,
        id: &str,
        update: &AppointmentUpdate,
        zone_id: Option<&str>,
    ) -> Result<AppointmentView, EngineError> {
        let zone = self.zone(zone_id)?;
        let id = parse_appointment_id(id)?;
        let mut patch = AppointmentPatch {
            category: update.category.as_deref().map(parse_category).transpose()?,
            ..Default::default()
        };
        match (update.start.as_deref(), update.end.as_deref()) {
            (Some(start), Some(end)) => {
                let window = time::local_window(start, end, zone, now_ms())?;
                patch.start = Some(window.start);
                patch.end = Some(window.end);
            }
            (start, end) => {
                patch.start = start
                    .map(|s| time::to_utc(time::parse_local(s)?, zone))
                    .transpose()?;
                patch.end = end
                    .map(|s| time::to_utc(time::parse_local(s)?, zone))
                    .transpose()?;
            }
        }
        let appointment = self.engine.update_appointment(id, &patch).await?;
        self.view(&appointment, zone)
    }

    pub async fn list_all(&self, zone_id: Option<&str>) -> Result<Vec<AppointmentView>, EngineError> {
        let zone = self.zone(zone_id)?;
        self.engine
            .list_appointments()
            .await
            .iter()
            .map(|a| self.view(a, zone))
            .collect()
    }

    pub async fn get_by_id(
        &self,
        id: &str,
        zone_id: Option<&str>,
    ) -> Result<AppointmentView, EngineError> {
        let zone = self.zone(zone_id)?;
        let appointment = self.engine.get_appointment(parse_appointment_id(id)?).await?;
        self.view(&appointment, zone)
    }

    /// Administrative removal. No lifecycle checks.
    pub async fn delete_appointment(&self, id: &str) -> Result<(), EngineError> {
        self.engine
            .delete_appointment(parse_appointment_id(id)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spotbook_test_booking");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn scheduler_with(name: &str, spots: &[(Category, u32)]) -> Scheduler {
        let engine = Arc::new(Engine::new(test_wal_path(name)).unwrap());
        engine.create_lot("Fiera", 50).await.unwrap();
        for &(category, n) in spots {
            engine.create_spots("Fiera", category, n).await.unwrap();
        }
        Scheduler::new(engine, time::DEFAULT_ZONE)
    }

    #[tokio::test]
    async fn create_renders_in_request_zone() {
        let s = scheduler_with("create_zone.wal", &[(Category::Vip, 1)]).await;
        let v = s
            .create_appointment("Fiera", "vip", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        assert_eq!(v.start, "01/06/2099 10:00");
        assert_eq!(v.zone, "Europe/Rome");
        assert_eq!(v.state, "VALID");
        assert_eq!(v.category, Category::Vip);

        let utc = s.get_by_id(&v.id, Some("UTC")).await.unwrap();
        assert_eq!(utc.start, "01/06/2099 08:00");
        assert_eq!(utc.end, "01/06/2099 09:00");
    }

    #[tokio::test]
    async fn create_rejects_bad_input_before_writing() {
        let s = scheduler_with("create_invalid.wal", &[(Category::Standard, 1)]).await;
        let past = s
            .create_appointment("Fiera", "STANDARD", "01/06/2001 10:00", "01/06/2001 11:00", None)
            .await;
        assert!(matches!(past, Err(EngineError::InvalidDateRange)));

        let zone = s
            .create_appointment(
                "Fiera",
                "STANDARD",
                "01/06/2099 10:00",
                "01/06/2099 11:00",
                Some("Nowhere/Land"),
            )
            .await;
        assert!(matches!(zone, Err(EngineError::InvalidTimeZone(_))));

        let category = s
            .create_appointment("Fiera", "TRUCK", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await;
        let Err(e @ EngineError::UnknownCategory(_)) = category else {
            panic!("expected UnknownCategory");
        };
        assert!(e.to_string().contains("[STANDARD, DISABLE, VIP, ELECTRIC]"));

        let format = s
            .create_appointment("Fiera", "STANDARD", "2099-06-01 10:00", "01/06/2099 11:00", None)
            .await;
        assert!(matches!(format, Err(EngineError::InvalidDateFormat(_))));

        assert!(s.list_all(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_lot_has_no_spot() {
        let s = scheduler_with("unknown_lot.wal", &[(Category::Standard, 1)]).await;
        let r = s
            .create_appointment("Nowhere", "STANDARD", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await;
        assert!(matches!(r, Err(EngineError::NoAvailableSpot { .. })));
    }

    #[tokio::test]
    async fn list_available_excludes_booked_spots() {
        let s = scheduler_with("list_available.wal", &[(Category::Electric, 2)]).await;
        let before = s
            .list_available("electric", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        assert_eq!(before.len(), 2);

        let booked = s
            .create_appointment("Fiera", "ELECTRIC", "01/06/2099 10:30", "01/06/2099 12:00", None)
            .await
            .unwrap();
        let after = s
            .list_available("ELECTRIC", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_ne!(after[0].id, booked.spot_id);
    }

    #[tokio::test]
    async fn update_category_only() {
        let s = scheduler_with("update_category.wal", &[(Category::Vip, 1)]).await;
        let v = s
            .create_appointment("Fiera", "VIP", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();

        let same = AppointmentUpdate {
            category: Some("VIP".into()),
            ..Default::default()
        };
        assert!(matches!(
            s.update_appointment(&v.id, &same, None).await,
            Err(EngineError::NoOpUpdate)
        ));

        let electric = AppointmentUpdate {
            category: Some("ELECTRIC".into()),
            ..Default::default()
        };
        let updated = s.update_appointment(&v.id, &electric, None).await.unwrap();
        assert_eq!(updated.category, Category::Electric);
        assert_eq!(updated.start, v.start);
        assert_eq!(updated.end, v.end);
        assert_eq!(updated.state, v.state);
        assert_eq!(updated.spot_id, v.spot_id);
    }

    #[tokio::test]
    async fn update_single_date_must_keep_order() {
        let s = scheduler_with("update_order.wal", &[(Category::Vip, 1)]).await;
        let v = s
            .create_appointment("Fiera", "VIP", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        let backwards = AppointmentUpdate {
            end: Some("01/06/2099 09:00".into()),
            ..Default::default()
        };
        assert!(matches!(
            s.update_appointment(&v.id, &backwards, None).await,
            Err(EngineError::InvalidDateRange)
        ));

        let later = AppointmentUpdate {
            end: Some("01/06/2099 12:30".into()),
            ..Default::default()
        };
        let updated = s.update_appointment(&v.id, &later, None).await.unwrap();
        assert_eq!(updated.end, "01/06/2099 12:30");
        assert_eq!(updated.start, "01/06/2099 10:00");
    }

    #[tokio::test]
    async fn update_window_conflict_on_same_spot() {
        let s = scheduler_with("update_conflict.wal", &[(Category::Disable, 1)]).await;
        let first = s
            .create_appointment("Fiera", "DISABLE", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        let second = s
            .create_appointment("Fiera", "DISABLE", "01/06/2099 12:00", "01/06/2099 13:00", None)
            .await
            .unwrap();
        let overlap = AppointmentUpdate {
            start: Some("01/06/2099 10:30".into()),
            end: Some("01/06/2099 13:00".into()),
            ..Default::default()
        };
        let r = s.update_appointment(&second.id, &overlap, None).await;
        assert!(matches!(r, Err(EngineError::Conflict(id)) if id.to_string() == first.id));

        // Both dates in the past are rejected like a new booking.
        let past = AppointmentUpdate {
            start: Some("01/06/2001 10:00".into()),
            end: Some("01/06/2001 11:00".into()),
            ..Default::default()
        };
        assert!(matches!(
            s.update_appointment(&second.id, &past, None).await,
            Err(EngineError::InvalidDateRange)
        ));
    }

    #[tokio::test]
    async fn cancel_twice_and_unknown_ids() {
        let s = scheduler_with("cancel_twice.wal", &[(Category::Standard, 1)]).await;
        let v = s
            .create_appointment("Fiera", "STANDARD", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        let once = s.cancel_appointment(&v.id, None).await.unwrap();
        let twice = s.cancel_appointment(&v.id, None).await.unwrap();
        assert_eq!(once.state, "CANCELED");
        assert_eq!(once, twice);

        let missing = Ulid::new().to_string();
        assert!(matches!(
            s.cancel_appointment(&missing, None).await,
            Err(EngineError::RecordNotFound(_))
        ));
        assert!(matches!(
            s.get_by_id("not-an-id", None).await,
            Err(EngineError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let s = scheduler_with("delete.wal", &[(Category::Standard, 1)]).await;
        let v = s
            .create_appointment("Fiera", "STANDARD", "01/06/2099 10:00", "01/06/2099 11:00", None)
            .await
            .unwrap();
        s.delete_appointment(&v.id).await.unwrap();
        assert!(matches!(
            s.get_by_id(&v.id, None).await,
            Err(EngineError::RecordNotFound(_))
        ));
        assert!(s.list_all(None).await.unwrap().is_empty());
    }

    #[test]
    fn views_serialize_with_upper_case_category() {
        let view = SpotView {
            id: "01J0000000000000000000000".into(),
            lot_name: "Fiera".into(),
            category: Category::Electric,
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["category"], "ELECTRIC");
    }
}
