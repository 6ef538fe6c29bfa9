use std::time::Instant;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;
use crate::patch::{self, AppointmentPatch, LotPatch, SpotPatch};

use super::conflict::{check_no_conflict, is_free, now_ms, validate_window};
use super::{Engine, EngineError, WalCommand};

fn snapshot(rs: &SpotState, id: Ulid) -> Result<Appointment, EngineError> {
    rs.appointment(id)
        .cloned()
        .ok_or_else(|| EngineError::RecordNotFound(format!("appointment {id}")))
}

impl Engine {
    pub(super) fn lot_named(&self, name: &str) -> Result<ParkingLot, EngineError> {
        self.store
            .lot_by_name(name.trim())
            .ok_or_else(|| EngineError::RecordNotFound(format!("parking lot '{}'", name.trim())))
    }

    // ── Lots ─────────────────────────────────────────────────

    pub async fn create_lot(
        &self,
        name: &str,
        vehicle_spot_number: u32,
    ) -> Result<ParkingLot, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::LimitExceeded("parking lot name is empty"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("parking lot name too long"));
        }

        let _catalog = self.catalog.lock().await;
        if self.store.lot_count() >= MAX_LOTS {
            return Err(EngineError::LimitExceeded("too many parking lots"));
        }
        if self.store.lot_by_name(name).is_some() {
            return Err(EngineError::AlreadyExists(format!("parking lot '{name}'")));
        }

        let lot = ParkingLot {
            id: self.next_id()?,
            name: name.to_string(),
            vehicle_spot_number,
        };
        self.persist_catalog(vec![Event::LotCreated {
            id: lot.id,
            name: lot.name.clone(),
            vehicle_spot_number,
        }])
        .await?;
        info!("created parking lot '{name}' with capacity {vehicle_spot_number}");
        Ok(lot)
    }

    /// Overwrite a lot's capacity and record the change. Spots already in the
    /// lot are kept even when the new capacity is lower.
    pub async fn update_lot_capacity(
        &self,
        name: &str,
        patch: &LotPatch,
    ) -> Result<ParkingLot, EngineError> {
        let _catalog = self.catalog.lock().await;
        let lot = self.lot_named(name)?;
        let merged = patch::merge(&lot, patch)?;
        let new_capacity = merged.value.vehicle_spot_number;
        self.persist_catalog(vec![Event::LotCapacityChanged {
            id: lot.id,
            old_capacity: lot.vehicle_spot_number,
            new_capacity,
            changed_at: now_ms(),
        }])
        .await?;
        info!(
            "parking lot '{}' capacity {} -> {new_capacity}",
            lot.name, lot.vehicle_spot_number
        );
        Ok(merged.value)
    }

    /// Remove a lot with all its spots. Rejected while any spot still has a
    /// valid appointment.
    pub async fn delete_lot(&self, name: &str) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let lot = self.lot_named(name)?;

        let mut spot_ids = self.store.spots_in_lot(&lot.id);
        spot_ids.sort();
        let mut guards = Vec::with_capacity(spot_ids.len());
        for spot_id in &spot_ids {
            if let Some(rs) = self.store.get_spot(spot_id) {
                guards.push(rs.write_owned().await);
            }
        }
        if let Some(busy) = guards.iter().find(|g| g.has_active()) {
            return Err(EngineError::SpotInUse(busy.spot.id));
        }

        let mut events: Vec<Event> = guards
            .iter()
            .map(|g| Event::SpotDeleted { id: g.spot.id })
            .collect();
        events.push(Event::LotDeleted { id: lot.id });
        self.wal_append(events.clone()).await?;

        for (guard, event) in guards.iter_mut().zip(&events) {
            self.store.apply_to_spot(guard, event);
        }
        self.store.apply_catalog(&Event::LotDeleted { id: lot.id });
        info!("deleted parking lot '{}' and {} spots", lot.name, guards.len());
        Ok(())
    }

    // ── Spots ────────────────────────────────────────────────

    /// Add `quantity` spots of one category to a lot, up to its capacity.
    pub async fn create_spots(
        &self,
        lot_name: &str,
        category: Category,
        quantity: u32,
    ) -> Result<Vec<VehicleSpot>, EngineError> {
        if quantity == 0 {
            return Err(EngineError::LimitExceeded("spot quantity must be at least 1"));
        }
        if quantity > MAX_SPOTS_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many spots in one request"));
        }

        let _catalog = self.catalog.lock().await;
        let lot = self.lot_named(lot_name)?;
        if self.store.spot_count() + quantity as usize > MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many vehicle spots"));
        }
        let current = u32::try_from(self.store.spots_in_lot_count(&lot.id)).unwrap_or(u32::MAX);
        let remaining = lot.vehicle_spot_number.saturating_sub(current);
        if quantity > remaining {
            return Err(EngineError::CapacityExceeded {
                lot_name: lot.name,
                remaining,
            });
        }

        let mut spots = Vec::with_capacity(quantity as usize);
        for _ in 0..quantity {
            spots.push(VehicleSpot {
                id: self.next_id()?,
                lot_id: lot.id,
                lot_name: lot.name.clone(),
                category,
            });
        }
        let events = spots
            .iter()
            .map(|s| Event::SpotCreated {
                id: s.id,
                lot_id: s.lot_id,
                category,
            })
            .collect();
        self.persist_catalog(events).await?;
        info!("added {quantity} {category} spots to parking lot '{}'", lot.name);
        Ok(spots)
    }

    /// Reassign a spot to another lot that still has room for it.
    pub async fn move_spot(
        &self,
        spot_id: Ulid,
        lot_name: &str,
    ) -> Result<VehicleSpot, EngineError> {
        let _catalog = self.catalog.lock().await;
        let target = self.lot_named(lot_name)?;
        let rs = self
            .store
            .get_spot(&spot_id)
            .ok_or_else(|| EngineError::RecordNotFound(format!("vehicle spot {spot_id}")))?;
        let mut guard = rs.write().await;
        if guard.spot.lot_id == target.id {
            return Err(EngineError::AlreadyInLot {
                spot_id,
                lot_name: target.name,
            });
        }
        let current = u32::try_from(self.store.spots_in_lot_count(&target.id)).unwrap_or(u32::MAX);
        if current >= target.vehicle_spot_number {
            return Err(EngineError::CapacityExceeded {
                lot_name: target.name,
                remaining: 0,
            });
        }

        let from = guard.spot.lot_name.clone();
        self.persist_and_apply(
            &mut guard,
            Event::SpotMoved {
                id: spot_id,
                lot_id: target.id,
            },
        )
        .await?;
        info!("moved spot {spot_id} from '{from}' to '{}'", target.name);
        Ok(guard.spot.clone())
    }

    pub async fn update_spot(
        &self,
        spot_id: Ulid,
        patch: &SpotPatch,
    ) -> Result<VehicleSpot, EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self
            .store
            .get_spot(&spot_id)
            .ok_or_else(|| EngineError::RecordNotFound(format!("vehicle spot {spot_id}")))?;
        let mut guard = rs.write().await;
        let merged = patch::merge(&guard.spot, patch)?;
        self.persist_and_apply(
            &mut guard,
            Event::SpotUpdated {
                id: spot_id,
                category: merged.value.category,
            },
        )
        .await?;
        Ok(merged.value)
    }

    /// Remove a spot and its appointment history. Rejected while it holds a
    /// valid appointment.
    pub async fn delete_spot(&self, spot_id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let rs = self
            .store
            .get_spot(&spot_id)
            .ok_or_else(|| EngineError::RecordNotFound(format!("vehicle spot {spot_id}")))?;
        let mut guard = rs.write().await;
        if guard.has_active() {
            return Err(EngineError::SpotInUse(spot_id));
        }
        self.persist_and_apply(&mut guard, Event::SpotDeleted { id: spot_id })
            .await?;
        info!("deleted spot {spot_id}");
        Ok(())
    }

    // ── Appointments ─────────────────────────────────────────

    /// Book the first spot of `category` in the named lot that is free for
    /// the whole window. Candidates are tried in the order they joined the lot.
    ///
    /// Each candidate's write lock is held from the conflict check through the
    /// WAL write, so two concurrent calls can never book the same spot for
    /// overlapping windows.
    pub async fn allocate(
        &self,
        lot_name: &str,
        category: Category,
        window: Window,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.first_fit(lot_name.trim(), category, window).await;
        match &result {
            Ok(a) => debug!(
                "booked spot {} in '{}' for [{}, {}] as {}",
                a.spot_id, a.lot_name, a.window.start, a.window.end, a.id
            ),
            Err(EngineError::NoAvailableSpot { .. }) => {
                metrics::counter!(observability::ALLOCATION_MISSES_TOTAL, "category" => category.name())
                    .increment(1);
            }
            Err(_) => {}
        }
        observability::record("allocate", started, &result);
        result
    }

    async fn first_fit(
        &self,
        lot_name: &str,
        category: Category,
        window: Window,
    ) -> Result<Appointment, EngineError> {
        validate_window(&window)?;
        let no_spot = || EngineError::NoAvailableSpot {
            lot_name: lot_name.to_string(),
            category,
        };
        // An unknown lot simply has no spots to offer.
        let Some(lot) = self.store.lot_by_name(lot_name) else {
            return Err(no_spot());
        };

        for spot_id in self.store.spots_in_lot(&lot.id) {
            let Some(rs) = self.store.get_spot(&spot_id) else {
                continue;
            };
            let mut guard = rs.write().await;
            // Moved, recategorized or deleted while we waited for the lock.
            if guard.spot.lot_id != lot.id
                || guard.spot.category != category
                || !self.store.contains_spot(&spot_id)
            {
                continue;
            }
            if !is_free(&guard, &window) {
                continue;
            }
            if guard.appointments.len() >= MAX_APPOINTMENTS_PER_SPOT {
                warn!("spot {spot_id} reached its appointment limit, skipping");
                continue;
            }

            let appointment = Appointment {
                id: self.next_id()?,
                spot_id,
                lot_id: lot.id,
                lot_name: guard.spot.lot_name.clone(),
                window,
                category: guard.spot.category,
                state: AppointmentState::Valid,
            };
            self.persist_and_apply(
                &mut guard,
                Event::AppointmentBooked {
                    appointment: appointment.clone(),
                },
            )
            .await?;
            return Ok(appointment);
        }
        Err(no_spot())
    }

    /// Move a valid appointment to CANCELED. Canceling an appointment that is
    /// already terminal returns it unchanged and writes nothing.
    pub async fn cancel(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.cancel_locked(id).await;
        observability::record("cancel", started, &result);
        result
    }

    async fn cancel_locked(&self, id: Ulid) -> Result<Appointment, EngineError> {
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = snapshot(&guard, id)?;
        if current.state.is_terminal() {
            debug!("cancel of {id} ignored: already {}", current.state);
            return Ok(current);
        }
        let spot_id = guard.spot.id;
        self.persist_and_apply(&mut guard, Event::AppointmentCanceled { id, spot_id })
            .await?;
        snapshot(&guard, id)
    }

    /// Apply a partial update. A changed window must still be well formed and,
    /// while the appointment is valid, free on its spot apart from itself.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, EngineError> {
        let started = Instant::now();
        let result = self.update_locked(id, patch).await;
        observability::record("update", started, &result);
        result
    }

    async fn update_locked(
        &self,
        id: Ulid,
        patch: &AppointmentPatch,
    ) -> Result<Appointment, EngineError> {
        let mut guard = self.resolve_appointment_write(&id).await?;
        let current = snapshot(&guard, id)?;
        let merged = patch::merge(&current, patch)?;
        let window = merged.value.window;
        if merged.touched("start") || merged.touched("end") {
            if window.start >= window.end {
                return Err(EngineError::InvalidDateRange);
            }
            validate_window(&window)?;
            if current.is_active() {
                check_no_conflict(&guard, &window, Some(id))?;
            }
        }

        let spot_id = guard.spot.id;
        self.persist_and_apply(
            &mut guard,
            Event::AppointmentUpdated {
                id,
                spot_id,
                category: merged.value.category,
                window,
            },
        )
        .await?;
        debug!("updated appointment {id}: {:?}", merged.changed);
        snapshot(&guard, id)
    }

    pub async fn delete_appointment(&self, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_appointment_write(&id).await?;
        let spot_id = guard.spot.id;
        self.persist_and_apply(&mut guard, Event::AppointmentDeleted { id, spot_id })
            .await
    }

    // ── Expiration ───────────────────────────────────────────

    /// Expire every valid appointment whose window ended at or before `now`.
    ///
    /// Spot locks are taken in id order. When `stop` fires, spots already
    /// locked are still swept and committed; the rest wait for the next run.
    /// All transitions of one run share a single WAL write.
    pub async fn sweep_expired(
        &self,
        now: Ms,
        stop: &CancellationToken,
    ) -> Result<usize, EngineError> {
        let due = self.find_valid_expiring_before(now).await;
        if due.is_empty() {
            return Ok(0);
        }
        let mut spot_ids: Vec<Ulid> = due.iter().map(|a| a.spot_id).collect();
        spot_ids.sort();
        spot_ids.dedup();

        let mut guards = Vec::with_capacity(spot_ids.len());
        for spot_id in &spot_ids {
            if stop.is_cancelled() {
                info!(
                    "sweep interrupted after {} of {} spots",
                    guards.len(),
                    spot_ids.len()
                );
                break;
            }
            if let Some(rs) = self.store.get_spot(spot_id) {
                guards.push(rs.write_owned().await);
            }
        }

        // Re-check under the lock: a cancel may have won the race.
        let mut events = Vec::new();
        let mut owners = Vec::new();
        for (idx, guard) in guards.iter().enumerate() {
            if !self.store.contains_spot(&guard.spot.id) {
                continue;
            }
            for a in guard
                .appointments
                .iter()
                .filter(|a| a.is_active() && a.window.elapsed_at(now))
            {
                events.push(Event::AppointmentExpired {
                    id: a.id,
                    spot_id: guard.spot.id,
                });
                owners.push(idx);
            }
        }
        if events.is_empty() {
            return Ok(0);
        }

        self.wal_append(events.clone()).await?;
        for (event, idx) in events.iter().zip(owners) {
            self.store.apply_to_spot(&mut guards[idx], event);
        }
        metrics::counter!(observability::APPOINTMENTS_EXPIRED_TOTAL).increment(events.len() as u64);
        Ok(events.len())
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;

        let mut guards = Vec::new();
        for spot_id in self.store.spot_ids() {
            if let Some(rs) = self.store.get_spot(&spot_id) {
                guards.push(rs.read_owned().await);
            }
        }
        let by_id: std::collections::HashMap<Ulid, usize> = guards
            .iter()
            .enumerate()
            .map(|(idx, g)| (g.spot.id, idx))
            .collect();

        let mut events = Vec::new();
        for lot_id in self.store.lot_ids() {
            let Some(lot) = self.store.lot(&lot_id) else {
                continue;
            };
            let change = self.store.capacity_change(&lot_id);
            events.push(Event::LotCreated {
                id: lot.id,
                name: lot.name.clone(),
                vehicle_spot_number: change
                    .as_ref()
                    .map_or(lot.vehicle_spot_number, |c| c.old_capacity),
            });
            if let Some(c) = change {
                events.push(Event::LotCapacityChanged {
                    id: lot.id,
                    old_capacity: c.old_capacity,
                    new_capacity: c.new_capacity,
                    changed_at: c.changed_at,
                });
            }
            for spot_id in self.store.spots_in_lot(&lot_id) {
                let Some(&idx) = by_id.get(&spot_id) else {
                    continue;
                };
                let rs = &guards[idx];
                events.push(Event::SpotCreated {
                    id: rs.spot.id,
                    lot_id,
                    category: rs.spot.category,
                });
                for a in &rs.appointments {
                    events.push(Event::AppointmentBooked {
                        appointment: a.clone(),
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.send_wal(WalCommand::Compact {
            events,
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .send_wal(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
