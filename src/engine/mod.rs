mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod registry;

pub use availability::{excluded_rooms, subtract_rooms, RoomFilter};
pub use conflict::{first_conflict, today, validate_stay};
pub use error::EngineError;
pub use queries::ReservationFilter;
pub use registry::Registry;

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL. Every append that is already queued
/// when the first one arrives joins the same batch and shares one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, mut batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    // Flush even after a failed append so half-written bytes don't leak
    // into the next batch; every caller in this batch is told it failed.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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

// ── Id sequences ─────────────────────────────────────────

/// Next id to hand out per entity kind. Ids start at 1 and never go back,
/// so a deleted room's id can't collide with its orphaned reservations.
pub(super) struct Sequences {
    hotel: AtomicU64,
    room: AtomicU64,
    reservation: AtomicU64,
}

impl Sequences {
    fn new() -> Self {
        Self {
            hotel: AtomicU64::new(1),
            room: AtomicU64::new(1),
            reservation: AtomicU64::new(1),
        }
    }

    pub(super) fn next_hotel(&self) -> HotelId {
        self.hotel.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn next_room(&self) -> RoomId {
        self.room.fetch_add(1, Ordering::Relaxed)
    }

    pub(super) fn next_reservation(&self) -> ReservationId {
        self.reservation.fetch_add(1, Ordering::Relaxed)
    }

    /// Move sequences past any id a replayed event carries.
    fn observe(&self, event: &Event) {
        match event {
            Event::HotelCreated { id, .. } => {
                self.hotel.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::RoomCreated { id, .. } => {
                self.room.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::ReservationCreated { id, .. } => {
                self.reservation.fetch_max(id + 1, Ordering::Relaxed);
            }
            Event::SequencesAdvanced { next_hotel, next_room, next_reservation } => {
                self.hotel.fetch_max(*next_hotel, Ordering::Relaxed);
                self.room.fetch_max(*next_room, Ordering::Relaxed);
                self.reservation.fetch_max(*next_reservation, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub(super) fn snapshot(&self) -> Event {
        Event::SequencesAdvanced {
            next_hotel: self.hotel.load(Ordering::Relaxed),
            next_room: self.room.load(Ordering::Relaxed),
            next_reservation: self.reservation.load(Ordering::Relaxed),
        }
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) registry: Registry,
    /// Every reservation ever made, including those whose room is gone.
    pub(super) reservations: DashMap<ReservationId, Reservation>,
    pub(super) sequences: Sequences,
    /// Serializes hotel and room mutations. Taken before any room lock.
    pub(super) registry_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            registry: Registry::new(),
            reservations: DashMap::new(),
            sequences: Sequences::new(),
            registry_lock: Mutex::new(()),
            wal_tx,
        };

        // Replay runs before the engine is shared, so every room lock is
        // uncontended and try_write always succeeds. Never block here: this
        // may already run inside the runtime.
        for event in &events {
            engine.sequences.observe(event);
            match event {
                Event::HotelCreated { id, title } => {
                    engine.registry.insert_hotel(Hotel { id: *id, title: title.clone() });
                }
                Event::HotelUpdated { id, title } => {
                    engine.registry.set_title(id, title.clone());
                }
                Event::HotelDeleted { id } => {
                    for room_id in engine.registry.rooms_of(id) {
                        if let Some(rs) = engine.get_room_state(&room_id) {
                            let mut guard = rs.try_write().expect("replay: uncontended write");
                            engine.retire_room(&mut guard);
                        }
                    }
                    engine.registry.remove_hotel(id);
                }
                Event::RoomCreated { id, hotel_id, number, floor } => {
                    engine.install_room(Room {
                        id: *id,
                        hotel_id: *hotel_id,
                        number: *number,
                        floor: *floor,
                    });
                }
                Event::RoomUpdated { number, floor, id } => {
                    if let Some(rs) = engine.get_room_state(id) {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.move_room(&mut guard, *number, *floor);
                    }
                }
                Event::RoomDeleted { id } => {
                    if let Some(rs) = engine.get_room_state(id) {
                        let mut guard = rs.try_write().expect("replay: uncontended write");
                        engine.retire_room(&mut guard);
                    }
                }
                Event::ReservationCreated { id, room_id, customer, stay } => {
                    let reservation = Reservation {
                        id: *id,
                        room_id: *room_id,
                        customer: customer.clone(),
                        stay: *stay,
                    };
                    match engine.get_room_state(room_id) {
                        Some(rs) => {
                            let mut guard = rs.try_write().expect("replay: uncontended write");
                            engine.record_reservation(Some(&mut *guard), reservation);
                        }
                        None => engine.record_reservation(None, reservation),
                    }
                }
                Event::SequencesAdvanced { .. } => {}
            }
        }

        if !events.is_empty() {
            info!(
                "replayed {} events: {} hotels, {} rooms, {} reservations",
                events.len(),
                engine.registry.hotel_count(),
                engine.rooms.len(),
                engine.reservations.len()
            );
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    // ── State transitions shared by replay and live mutations ──

    pub(super) fn install_room(&self, room: Room) {
        self.registry.claim_key(room.key(), room.id);
        self.registry.add_room(room.hotel_id, room.id);
        self.rooms.insert(room.id, Arc::new(RwLock::new(RoomState::new(room))));
    }

    /// Caller holds the room's write lock. Its reservations stay in the
    /// global map.
    pub(super) fn retire_room(&self, rs: &mut RoomState) {
        rs.deleted = true;
        let room = rs.room;
        self.registry.release_key(&room.key(), room.id);
        self.registry.remove_room(&room.hotel_id, &room.id);
        self.rooms.remove(&room.id);
    }

    /// Caller holds the room's write lock.
    pub(super) fn move_room(&self, rs: &mut RoomState, number: u16, floor: u16) {
        let old = rs.room.key();
        rs.room.number = number;
        rs.room.floor = floor;
        self.registry.release_key(&old, rs.room.id);
        self.registry.claim_key(rs.room.key(), rs.room.id);
    }

    /// `rs` is the reservation's room under its write lock, or `None` when
    /// the room no longer exists.
    pub(super) fn record_reservation(&self, rs: Option<&mut RoomState>, reservation: Reservation) {
        if let Some(rs) = rs {
            rs.insert_stay(reservation.id, reservation.stay);
        }
        self.reservations.insert(reservation.id, reservation);
    }
}
