use chrono::NaiveDate;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, validate_customer, validate_placement, validate_stay, validate_title};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Hotels ───────────────────────────────────────────────

    pub async fn create_hotel(&self, title: String) -> Result<Hotel, EngineError> {
        validate_title(&title)?;
        let _registry = self.registry_lock.lock().await;
        if self.registry.hotel_count() >= MAX_HOTELS {
            return Err(EngineError::LimitExceeded("too many hotels"));
        }

        let hotel = Hotel { id: self.sequences.next_hotel(), title };
        let event = Event::HotelCreated { id: hotel.id, title: hotel.title.clone() };
        self.wal_append(&event).await?;
        self.registry.insert_hotel(hotel.clone());
        Ok(hotel)
    }

    pub async fn update_hotel(&self, id: HotelId, title: String) -> Result<Hotel, EngineError> {
        validate_title(&title)?;
        let _registry = self.registry_lock.lock().await;
        if !self.registry.contains_hotel(&id) {
            return Err(EngineError::HotelNotFound(id));
        }

        let event = Event::HotelUpdated { id, title: title.clone() };
        self.wal_append(&event).await?;
        self.registry.set_title(&id, title.clone());
        Ok(Hotel { id, title })
    }

    /// Delete a hotel and every room it owns. Reservations on those rooms
    /// are left in place.
    pub async fn delete_hotel(&self, id: HotelId) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        if !self.registry.contains_hotel(&id) {
            return Err(EngineError::HotelNotFound(id));
        }

        // Lock in id order; reservation writers only ever hold one room lock.
        let mut room_ids = self.registry.rooms_of(&id);
        room_ids.sort_unstable();
        let mut guards = Vec::with_capacity(room_ids.len());
        for room_id in &room_ids {
            if let Some(rs) = self.get_room_state(room_id) {
                guards.push(rs.write_owned().await);
            }
        }

        self.wal_append(&Event::HotelDeleted { id }).await?;
        for guard in &mut guards {
            self.retire_room(guard);
        }
        self.registry.remove_hotel(&id);
        info!("deleted hotel {id} with {} rooms", guards.len());
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        hotel_id: HotelId,
        number: u16,
        floor: u16,
    ) -> Result<Room, EngineError> {
        validate_placement(number, floor)?;
        let _registry = self.registry_lock.lock().await;
        if !self.registry.contains_hotel(&hotel_id) {
            return Err(EngineError::HotelNotFound(hotel_id));
        }
        let key = RoomKey { hotel_id, floor, number };
        if self.registry.room_for_key(&key).is_some() {
            return Err(EngineError::RoomAlreadyExists { hotel_id, floor, number });
        }
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id: self.sequences.next_room(),
            hotel_id,
            number,
            floor,
        };
        let event = Event::RoomCreated { id: room.id, hotel_id, number, floor };
        self.wal_append(&event).await?;
        self.install_room(room);
        Ok(room)
    }

    /// Partial update of a room's placement. Fields left `None` keep their value.
    pub async fn update_room(
        &self,
        id: RoomId,
        number: Option<u16>,
        floor: Option<u16>,
    ) -> Result<Room, EngineError> {
        let _registry = self.registry_lock.lock().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(id));
        }

        let number = number.unwrap_or(guard.room.number);
        let floor = floor.unwrap_or(guard.room.floor);
        validate_placement(number, floor)?;
        let key = RoomKey { hotel_id: guard.room.hotel_id, floor, number };
        if let Some(owner) = self.registry.room_for_key(&key)
            && owner != id
        {
            return Err(EngineError::RoomAlreadyExists { hotel_id: key.hotel_id, floor, number });
        }

        self.wal_append(&Event::RoomUpdated { id, number, floor }).await?;
        self.move_room(&mut guard, number, floor);
        Ok(guard.room)
    }

    /// Delete a room. Its reservations are neither removed nor checked.
    pub async fn delete_room(&self, id: RoomId) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let rs = self.get_room_state(&id).ok_or(EngineError::RoomNotFound(id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(id));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        self.retire_room(&mut guard);
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `room_id` for `stay`.
    ///
    /// Gates run in order and any failure aborts before anything is written:
    /// field limits, the date validator against `today`, room lookup, then
    /// the conflict check. Dates are checked before the room is looked up,
    /// so a bad range reports `InvalidRange`/`PastStart` even for an unknown
    /// room. The room's write lock is held from the conflict
    /// check through the WAL append, so overlapping requests for one room
    /// are serialized and only the first can pass.
    pub async fn create_reservation(
        &self,
        customer: String,
        room_id: RoomId,
        stay: Stay,
        today: NaiveDate,
    ) -> Result<ReservationInfo, EngineError> {
        validate_customer(&customer)?;
        validate_stay(&stay, today)?;

        let rs = self.get_room_state(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::RoomNotFound(room_id));
        }
        if guard.stays.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }

        if let Err(e) = check_no_conflict(&guard, &stay) {
            debug!("reservation for room {room_id} rejected: {e}");
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let reservation = Reservation {
            id: self.sequences.next_reservation(),
            room_id,
            customer,
            stay,
        };
        let event = Event::ReservationCreated {
            id: reservation.id,
            room_id,
            customer: reservation.customer.clone(),
            stay,
        };
        self.wal_append(&event).await?;
        self.record_reservation(Some(&mut *guard), reservation.clone());
        let room = guard.room;
        drop(guard);

        metrics::counter!(crate::observability::RESERVATIONS_CREATED_TOTAL).increment(1);
        Ok(self.describe_reservation(&reservation, Some(room)))
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Holding the registry lock keeps hotels and rooms still; reservations
        // created meanwhile are appended to the old log and then lost in the
        // swap, so take every room lock as well.
        let _registry = self.registry_lock.lock().await;
        let mut room_ids: Vec<RoomId> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort_unstable();
        let mut guards = Vec::with_capacity(room_ids.len());
        for id in &room_ids {
            if let Some(rs) = self.get_room_state(id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = vec![self.sequences.snapshot()];
        for hotel in self.registry.hotels() {
            events.push(Event::HotelCreated { id: hotel.id, title: hotel.title });
        }
        for guard in &guards {
            let room = guard.room;
            events.push(Event::RoomCreated {
                id: room.id,
                hotel_id: room.hotel_id,
                number: room.number,
                floor: room.floor,
            });
        }
        let mut reservations: Vec<Reservation> =
            self.reservations.iter().map(|e| e.value().clone()).collect();
        reservations.sort_by_key(|r| r.id);
        for r in reservations {
            events.push(Event::ReservationCreated {
                id: r.id,
                room_id: r.room_id,
                customer: r.customer,
                stay: r.stay,
            });
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
