use dashmap::DashMap;

use crate::model::*;

/// Hotels plus the two room indexes the registry invariants rest on:
/// `(hotel, floor, number)` → room for uniqueness, and hotel → rooms for
/// cascading deletes. Mutations are serialized by the engine's registry lock.
pub struct Registry {
    hotels: DashMap<HotelId, Hotel>,
    room_keys: DashMap<RoomKey, RoomId>,
    hotel_rooms: DashMap<HotelId, Vec<RoomId>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            hotels: DashMap::new(),
            room_keys: DashMap::new(),
            hotel_rooms: DashMap::new(),
        }
    }

    // ── Hotels ───────────────────────────────────────────────

    pub fn hotel_count(&self) -> usize {
        self.hotels.len()
    }

    pub fn contains_hotel(&self, id: &HotelId) -> bool {
        self.hotels.contains_key(id)
    }

    pub fn get_hotel(&self, id: &HotelId) -> Option<Hotel> {
        self.hotels.get(id).map(|e| e.value().clone())
    }

    pub fn insert_hotel(&self, hotel: Hotel) {
        self.hotels.insert(hotel.id, hotel);
    }

    pub fn set_title(&self, id: &HotelId, title: String) -> bool {
        match self.hotels.get_mut(id) {
            Some(mut hotel) => {
                hotel.title = title;
                true
            }
            None => false,
        }
    }

    pub fn remove_hotel(&self, id: &HotelId) -> Option<Hotel> {
        self.hotel_rooms.remove(id);
        self.hotels.remove(id).map(|(_, hotel)| hotel)
    }

    pub fn hotels(&self) -> Vec<Hotel> {
        let mut hotels: Vec<Hotel> = self.hotels.iter().map(|e| e.value().clone()).collect();
        hotels.sort_by_key(|h| h.id);
        hotels
    }

    // ── Room keys ────────────────────────────────────────────

    pub fn room_for_key(&self, key: &RoomKey) -> Option<RoomId> {
        self.room_keys.get(key).map(|e| *e.value())
    }

    pub fn claim_key(&self, key: RoomKey, room_id: RoomId) {
        self.room_keys.insert(key, room_id);
    }

    /// Release `key` if it still belongs to `room_id`.
    pub fn release_key(&self, key: &RoomKey, room_id: RoomId) {
        self.room_keys.remove_if(key, |_, owner| *owner == room_id);
    }

    // ── Hotel → rooms index ──────────────────────────────────

    pub fn add_room(&self, hotel_id: HotelId, room_id: RoomId) {
        self.hotel_rooms.entry(hotel_id).or_default().push(room_id);
    }

    pub fn remove_room(&self, hotel_id: &HotelId, room_id: &RoomId) {
        if let Some(mut rooms) = self.hotel_rooms.get_mut(hotel_id) {
            rooms.retain(|r| r != room_id);
        }
    }

    pub fn rooms_of(&self, hotel_id: &HotelId) -> Vec<RoomId> {
        self.hotel_rooms
            .get(hotel_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }
}
