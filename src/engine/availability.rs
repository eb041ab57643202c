use std::collections::BTreeSet;

use crate::model::*;

// ── Fleet exclusion ───────────────────────────────────────────────

/// Rooms holding at least one reservation that `request` conflicts with.
///
/// Scans every reservation it is given; callers pass the whole system's
/// reservations, so the result is not scoped to any hotel.
pub fn excluded_rooms(
    reservations: impl IntoIterator<Item = (RoomId, Stay)>,
    request: &Stay,
) -> BTreeSet<RoomId> {
    reservations
        .into_iter()
        .filter(|(_, stay)| request.conflicts_with(stay))
        .map(|(room_id, _)| room_id)
        .collect()
}

/// Complement of `excluded` within `rooms`, sorted by id.
pub fn subtract_rooms(rooms: impl IntoIterator<Item = Room>, excluded: &BTreeSet<RoomId>) -> Vec<Room> {
    let mut free: Vec<Room> = rooms
        .into_iter()
        .filter(|room| !excluded.contains(&room.id))
        .collect();
    free.sort_by_key(|room| room.id);
    free
}

/// Listing filter applied after fleet exclusion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub hotel_id: Option<HotelId>,
    pub room_id: Option<RoomId>,
}

impl RoomFilter {
    pub fn matches(&self, room: &Room) -> bool {
        self.hotel_id.is_none_or(|h| room.hotel_id == h) && self.room_id.is_none_or(|id| room.id == id)
    }
}
