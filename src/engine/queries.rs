use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{excluded_rooms, subtract_rooms, RoomFilter};
use super::conflict::{check_no_conflict, first_conflict, validate_stay};
use super::{Engine, EngineError};

/// Optional, AND-combined filters for listing reservations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub room_id: Option<RoomId>,
    pub hotel_id: Option<HotelId>,
    pub customer: Option<String>,
}

impl ReservationFilter {
    fn matches(&self, info: &ReservationInfo) -> bool {
        self.room_id.is_none_or(|id| info.room_id == id)
            && self.hotel_id.is_none_or(|id| info.hotel().is_some_and(|h| h.id == id))
            && self.customer.as_deref().is_none_or(|c| info.customer == c)
    }
}

impl Engine {
    // ── Availability ─────────────────────────────────────────

    /// Fails with `RoomAlreadyReserved` if any reservation of `room_id`
    /// conflicts with `stay`. A deleted room is checked against the
    /// reservations it left behind.
    pub async fn check_room_available(&self, room_id: RoomId, stay: &Stay) -> Result<(), EngineError> {
        if let Some(rs) = self.get_room_state(&room_id) {
            let guard = rs.read().await;
            if !guard.deleted {
                return check_no_conflict(&guard, stay);
            }
        }
        let orphans: Vec<(ReservationId, Stay)> = self
            .reservations
            .iter()
            .filter(|e| e.room_id == room_id)
            .map(|e| (e.id, e.stay))
            .collect();
        match first_conflict(&orphans, stay) {
            Some(reservation_id) => Err(EngineError::RoomAlreadyReserved { room_id, reservation_id }),
            None => Ok(()),
        }
    }

    /// Rooms that cannot take `stay`, across every hotel. Subtract from the
    /// room list to get the free ones.
    pub fn list_available_rooms(&self, stay: &Stay, today: NaiveDate) -> Result<BTreeSet<RoomId>, EngineError> {
        validate_stay(stay, today)?;
        Ok(excluded_rooms(
            self.reservations.iter().map(|e| (e.room_id, e.stay)),
            stay,
        ))
    }

    /// Rooms free for `stay`, narrowed by `filter`. The filter applies to the
    /// listing only; exclusion always looks at every reservation.
    pub async fn available_rooms(
        &self,
        stay: &Stay,
        today: NaiveDate,
        filter: RoomFilter,
    ) -> Result<Vec<Room>, EngineError> {
        let excluded = self.list_available_rooms(stay, today)?;
        let rooms = self.all_rooms().await.into_iter().filter(|r| filter.matches(r));
        Ok(subtract_rooms(rooms, &excluded))
    }

    // ── Hotels and rooms ─────────────────────────────────────

    pub fn get_hotel(&self, id: HotelId) -> Option<Hotel> {
        self.registry.get_hotel(&id)
    }

    pub fn list_hotels(&self) -> Vec<Hotel> {
        self.registry.hotels()
    }

    pub async fn get_room(&self, id: RoomId) -> Option<Room> {
        let rs = self.get_room_state(&id)?;
        let guard = rs.read().await;
        (!guard.deleted).then_some(guard.room)
    }

    pub async fn all_rooms(&self) -> Vec<Room> {
        let states: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut rooms = Vec::with_capacity(states.len());
        for rs in states {
            let guard = rs.read().await;
            if !guard.deleted {
                rooms.push(guard.room);
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    /// Rooms of one hotel, optionally on one floor. An unknown hotel has no rooms.
    pub async fn list_rooms(&self, hotel_id: HotelId, floor: Option<u16>) -> Vec<Room> {
        let mut rooms = Vec::new();
        for id in self.registry.rooms_of(&hotel_id) {
            if let Some(room) = self.get_room(id).await
                && floor.is_none_or(|f| room.floor == f)
            {
                rooms.push(room);
            }
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    // ── Reservations ─────────────────────────────────────────

    pub(super) fn describe_reservation(&self, r: &Reservation, room: Option<Room>) -> ReservationInfo {
        ReservationInfo {
            id: r.id,
            customer: r.customer.clone(),
            room_id: r.room_id,
            start_date: r.stay.start,
            end_date: r.stay.end,
            room: room.map(|room| RoomInfo {
                id: room.id,
                number: room.number,
                floor: room.floor,
                hotel: self.registry.get_hotel(&room.hotel_id),
            }),
        }
    }

    async fn resolve(&self, r: &Reservation) -> ReservationInfo {
        let room = self.get_room(r.room_id).await;
        self.describe_reservation(r, room)
    }

    pub async fn get_reservation(&self, id: ReservationId) -> Option<ReservationInfo> {
        let r = self.reservations.get(&id).map(|e| e.value().clone())?;
        Some(self.resolve(&r).await)
    }

    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<ReservationInfo> {
        let mut all: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        let mut out = Vec::new();
        for r in &all {
            let info = self.resolve(r).await;
            if filter.matches(&info) {
                out.push(info);
            }
        }
        out
    }

    /// Reservations on `room_ids` that intersect the window. Either bound may
    /// be open. Uses plain intersection, not the booking conflict rule.
    pub async fn booked_rooms(
        &self,
        room_ids: &[RoomId],
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Vec<ReservationInfo>, EngineError> {
        if room_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many room ids"));
        }
        let wanted: BTreeSet<RoomId> = room_ids.iter().copied().collect();
        let window = Stay::new(from.unwrap_or(NaiveDate::MIN), until.unwrap_or(NaiveDate::MAX));
        let mut hits: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| wanted.contains(&e.room_id) && e.stay.overlaps(&window))
            .map(|e| e.value().clone())
            .collect();
        hits.sort_by_key(|r| r.id);

        let mut out = Vec::with_capacity(hits.len());
        for r in &hits {
            out.push(self.resolve(r).await);
        }
        Ok(out)
    }
}
