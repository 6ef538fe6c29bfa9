//! Read-only reporting over lots and appointments.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, TimeDelta};
use chrono_tz::Tz;
use serde::Serialize;

use crate::engine::{Engine, EngineError};
use crate::model::{AppointmentState, CapacityChange, Category, ParkingLot};
use crate::time;

const DAY_FORMAT: &str = "%d %B %Y";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Occupancy {
    pub total: u32,
    pub occupied: u32,
    pub available: u32,
}

impl Occupancy {
    fn new(total: u32, occupied: u32) -> Self {
        Self {
            total,
            occupied,
            available: total.saturating_sub(occupied),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotOccupancy {
    pub lot_name: String,
    /// `total` is the lot's declared capacity.
    pub overall: Occupancy,
    /// `total` is the number of spots of that category in the lot.
    pub by_category: BTreeMap<Category, Occupancy>,
}

/// Valid reservations starting in one day, week or month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationCount {
    pub period: String,
    pub total_reservations: u64,
}

/// One appointment of a lot, rendered in the caller's zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub start: String,
    pub end: String,
    pub state: String,
    pub category: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    /// ISO weeks, Monday to Sunday.
    Week,
    Month,
}

impl Granularity {
    /// First day of the bucket holding `date`, and its label.
    fn bucket(self, date: NaiveDate) -> (NaiveDate, String) {
        match self {
            Granularity::Day => (date, date.format(DAY_FORMAT).to_string()),
            Granularity::Week => {
                let monday =
                    date - TimeDelta::days(i64::from(date.weekday().num_days_from_monday()));
                let sunday = monday + TimeDelta::days(6);
                let label = format!("{} - {}", monday.format(DAY_FORMAT), sunday.format(DAY_FORMAT));
                (monday, label)
            }
            Granularity::Month => {
                let first = date - TimeDelta::days(i64::from(date.day0()));
                (first, date.format("%B %Y").to_string())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityChangeView {
    pub lot_name: String,
    pub old_capacity: u32,
    pub new_capacity: u32,
    pub changed_at: String,
}

/// Lot names compare case-insensitively in report lookups.
fn same_lot_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn find_lot(engine: &Engine, lot_name: &str) -> Result<ParkingLot, EngineError> {
    engine
        .list_lots()
        .into_iter()
        .find(|lot| same_lot_name(&lot.name, lot_name))
        .ok_or_else(|| EngineError::RecordNotFound(format!("parking lot '{}'", lot_name.trim())))
}

async fn lot_occupancy_of(engine: &Engine, lot: ParkingLot) -> LotOccupancy {
    let mut spots: BTreeMap<Category, u32> = BTreeMap::new();
    let mut valid: BTreeMap<Category, u32> = BTreeMap::new();
    for spot_id in engine.store.spots_in_lot(&lot.id) {
        let Some(rs) = engine.get_spot(&spot_id) else {
            continue;
        };
        let guard = rs.read().await;
        *spots.entry(guard.spot.category).or_default() += 1;
        let active = guard.appointments.iter().filter(|a| a.is_active()).count();
        let taken = valid.entry(guard.spot.category).or_default();
        *taken = taken.saturating_add(u32::try_from(active).unwrap_or(u32::MAX));
    }

    let occupied = valid.values().fold(0u32, |sum, n| sum.saturating_add(*n));
    let by_category = spots
        .iter()
        .map(|(category, &total)| {
            let taken = valid.get(category).copied().unwrap_or(0);
            (*category, Occupancy::new(total, taken))
        })
        .collect();
    LotOccupancy {
        lot_name: lot.name,
        overall: Occupancy::new(lot.vehicle_spot_number, occupied),
        by_category,
    }
}

/// Valid appointments against capacity, per lot in creation order.
pub async fn occupancy(engine: &Engine) -> Vec<LotOccupancy> {
    let mut report = Vec::new();
    for lot in engine.list_lots() {
        report.push(lot_occupancy_of(engine, lot).await);
    }
    report
}

pub async fn lot_occupancy(engine: &Engine, lot_name: &str) -> Result<LotOccupancy, EngineError> {
    let lot = find_lot(engine, lot_name)?;
    Ok(lot_occupancy_of(engine, lot).await)
}

/// Valid reservations of one lot bucketed by the local date they start on,
/// oldest bucket first. A lot with no reservations, or no such lot, yields
/// an empty list.
pub async fn reservation_counts(
    engine: &Engine,
    lot_name: &str,
    granularity: Granularity,
    zone: Tz,
) -> Result<Vec<ReservationCount>, EngineError> {
    let mut buckets: BTreeMap<NaiveDate, (String, u64)> = BTreeMap::new();
    for a in engine.list_appointments().await {
        if !a.is_active() || !same_lot_name(&a.lot_name, lot_name) {
            continue;
        }
        let date = time::to_zone(a.window.start, zone)?.date();
        let (key, label) = granularity.bucket(date);
        buckets.entry(key).or_insert((label, 0)).1 += 1;
    }
    Ok(buckets
        .into_values()
        .map(|(period, total_reservations)| ReservationCount {
            period,
            total_reservations,
        })
        .collect())
}

/// Every appointment booked in a lot, any state, in booking order.
pub async fn reservation_history(
    engine: &Engine,
    lot_name: &str,
    zone: Tz,
) -> Result<Vec<HistoryEntry>, EngineError> {
    engine
        .list_appointments()
        .await
        .into_iter()
        .filter(|a| same_lot_name(&a.lot_name, lot_name))
        .map(|a| {
            Ok(HistoryEntry {
                start: time::format_local(a.window.start, zone)?,
                end: time::format_local(a.window.end, zone)?,
                state: a.state.name().to_string(),
                category: a.category.name().to_string(),
            })
        })
        .collect()
}

/// Percentage of all appointments that ended up canceled. Zero when there are none.
pub async fn cancellation_rate(engine: &Engine) -> f64 {
    let all = engine.list_appointments().await;
    if all.is_empty() {
        return 0.0;
    }
    let canceled = all
        .iter()
        .filter(|a| a.state == AppointmentState::Canceled)
        .count();
    canceled as f64 * 100.0 / all.len() as f64
}

fn change_view(change: CapacityChange, zone: Tz) -> Result<CapacityChangeView, EngineError> {
    Ok(CapacityChangeView {
        changed_at: time::format_local(change.changed_at, zone)?,
        lot_name: change.lot_name,
        old_capacity: change.old_capacity,
        new_capacity: change.new_capacity,
    })
}

pub fn capacity_history(engine: &Engine, zone: Tz) -> Result<Vec<CapacityChangeView>, EngineError> {
    engine
        .capacity_changes()
        .into_iter()
        .map(|c| change_view(c, zone))
        .collect()
}

/// Capacity change recorded for one lot, if any.
pub fn lot_capacity_history(
    engine: &Engine,
    lot_name: &str,
    zone: Tz,
) -> Result<Vec<CapacityChangeView>, EngineError> {
    let lot = find_lot(engine, lot_name)?;
    engine
        .capacity_changes()
        .into_iter()
        .filter(|c| c.lot_id == lot.id)
        .map(|c| change_view(c, zone))
        .collect()
}
