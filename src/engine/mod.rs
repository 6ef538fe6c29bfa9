mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use error::EngineError;
pub use store::Store;

pub(crate) use conflict::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events of one logical change; written together, acknowledged together.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Waits for one append, drains whatever else is already
/// queued, then pays a single fsync for the lot.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
    debug!("wal writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    let event_count: usize = batch.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let flush_start = std::time::Instant::now();

    let result = write_group(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

/// Write and fsync every pending append. On failure the log is cut back to
/// where the group started, so nothing a caller saw fail survives a replay
/// and later groups never land behind a partial frame.
fn write_group(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mark = wal.mark()?;
    let written = batch
        .iter()
        .try_for_each(|(events, _)| wal.append_all(events))
        .and_then(|()| wal.flush_sync());
    if let Err(e) = &written {
        warn!("WAL group write failed, rolling back: {e}");
        if let Err(rollback) = wal.rollback(mark) {
            error!("WAL rollback failed, refusing further appends: {rollback}");
        }
    }
    written
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The appointment scheduling engine: lots, spots and their appointments,
/// kept in memory and made durable through the WAL.
pub struct Engine {
    pub store: Store,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes lot and spot membership changes (create, move, delete,
    /// capacity). Always taken before any spot lock.
    pub(super) catalog: Mutex<()>,
    /// Monotonic ids, so id order is creation order even within one millisecond.
    ids: std::sync::Mutex<ulid::Generator>,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    /// Must be called from within a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: Store::new(),
            wal_tx,
            catalog: Mutex::new(()),
            ids: std::sync::Mutex::new(ulid::Generator::new()),
        };

        // Nothing else holds these locks yet, so try_write always succeeds.
        // blocking_write would panic when replay runs inside the runtime.
        for event in &events {
            match event.spot_id() {
                None => engine.store.apply_catalog(event),
                Some(spot_id) => {
                    let Some(rs) = engine.store.get_spot(&spot_id) else {
                        continue;
                    };
                    let Ok(mut guard) = rs.try_write() else {
                        continue;
                    };
                    engine.store.apply_to_spot(&mut guard, event);
                }
            }
        }
        info!(
            "replayed {} events: {} lots, {} spots, {} appointments",
            events.len(),
            engine.store.lot_count(),
            engine.store.spot_count(),
            engine.store.appointment_count()
        );

        Ok(engine)
    }

    pub(super) fn next_id(&self) -> Result<Ulid, EngineError> {
        let mut ids = self
            .ids
            .lock()
            .map_err(|_| EngineError::PersistenceFailure("id generator poisoned".into()))?;
        ids.generate()
            .map_err(|_| EngineError::LimitExceeded("id space exhausted for this millisecond"))
    }

    async fn send_wal(&self, cmd: WalCommand) -> Result<(), EngineError> {
        self.wal_tx
            .send(cmd)
            .await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer shut down".into()))
    }

    /// Durably write `events` as one group. Either all are written or the call
    /// fails and none of them reach the log.
    pub(super) async fn wal_append(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send_wal(WalCommand::Append {
            events,
            response: tx,
        })
        .await?;
        rx.await
            .map_err(|_| EngineError::PersistenceFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::PersistenceFailure(e.to_string()))
    }

    /// WAL-append then apply a spot-scoped event. The caller holds the spot's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut SpotState,
        event: Event,
    ) -> Result<(), EngineError> {
        self.wal_append(vec![event.clone()]).await?;
        self.store.apply_to_spot(rs, &event);
        Ok(())
    }

    /// WAL-append then apply a lot or spot-creation event. The caller holds `catalog`.
    pub(super) async fn persist_catalog(&self, events: Vec<Event>) -> Result<(), EngineError> {
        self.wal_append(events.clone()).await?;
        for event in &events {
            self.store.apply_catalog(event);
        }
        Ok(())
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.store.get_spot(id)
    }

    /// Look up the spot owning an appointment and take its write lock.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<SpotState>, EngineError> {
        let not_found = || EngineError::RecordNotFound(format!("appointment {appointment_id}"));
        let spot_id = self
            .store
            .spot_for_appointment(appointment_id)
            .ok_or_else(not_found)?;
        let rs = self.store.get_spot(&spot_id).ok_or_else(not_found)?;
        let guard = rs.write_owned().await;
        // Deleted while we waited for the lock.
        if guard.appointment(*appointment_id).is_none() {
            return Err(not_found());
        }
        Ok(guard)
    }
}
