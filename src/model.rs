use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type HotelId = u64;
pub type RoomId = u64;
pub type ReservationId = u64;

/// Calendar-day booking interval. `end` is the checkout day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Stay {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Whether `self`, a requested stay, collides with an `existing` one.
    ///
    /// `(S <= s AND E > s) OR (S < e AND E >= e)` with `self = (s, e)` and
    /// `existing = (S, E)`. This is intentionally not an intersection test:
    /// checking in on an existing checkout day is free, and a request that
    /// strictly encloses an existing stay does not match either clause.
    pub fn conflicts_with(&self, existing: &Stay) -> bool {
        (existing.start <= self.start && existing.end > self.start)
            || (existing.start < self.end && existing.end >= self.end)
    }

    /// Plain intersection of the two ranges, used by the booked-rooms report.
    pub fn overlaps(&self, other: &Stay) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: HotelId,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub hotel_id: HotelId,
    pub number: u16,
    pub floor: u16,
}

impl Room {
    pub fn key(&self) -> RoomKey {
        RoomKey {
            hotel_id: self.hotel_id,
            floor: self.floor,
            number: self.number,
        }
    }
}

/// A room's place within its hotel. Unique across all rooms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub hotel_id: HotelId,
    pub floor: u16,
    pub number: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub room_id: RoomId,
    pub customer: String,
    pub stay: Stay,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Set under the write lock when the room is deleted, so a writer that
    /// was already waiting on the lock sees the room as gone.
    pub deleted: bool,
    /// Reservations on this room, sorted by `stay.start`.
    pub stays: Vec<(ReservationId, Stay)>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            deleted: false,
            stays: Vec::new(),
        }
    }

    /// Insert a stay maintaining sort order by start date.
    pub fn insert_stay(&mut self, id: ReservationId, stay: Stay) {
        let pos = self
            .stays
            .binary_search_by_key(&stay.start, |(_, s)| s.start)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, (id, stay));
    }

    /// Stays that could conflict with `request`: everything starting on or
    /// before its end day. Both predicate clauses need `S <= e`.
    pub fn candidates(&self, request: &Stay) -> impl Iterator<Item = &(ReservationId, Stay)> {
        let right_bound = self.stays.partition_point(|(_, s)| s.start <= request.end);
        self.stays[..right_bound].iter()
    }
}

/// The event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HotelCreated {
        id: HotelId,
        title: String,
    },
    HotelUpdated {
        id: HotelId,
        title: String,
    },
    HotelDeleted {
        id: HotelId,
    },
    RoomCreated {
        id: RoomId,
        hotel_id: HotelId,
        number: u16,
        floor: u16,
    },
    RoomUpdated {
        id: RoomId,
        number: u16,
        floor: u16,
    },
    RoomDeleted {
        id: RoomId,
    },
    ReservationCreated {
        id: ReservationId,
        room_id: RoomId,
        customer: String,
        stay: Stay,
    },
    /// Written at the head of a compacted log so ids of deleted entities
    /// are never handed out again.
    SequencesAdvanced {
        next_hotel: HotelId,
        next_room: RoomId,
        next_reservation: ReservationId,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A room together with its owning hotel, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub number: u16,
    pub floor: u16,
    pub hotel: Option<Hotel>,
}

/// A reservation with its room and hotel resolved. `room` is `None` for
/// reservations whose room has since been deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationInfo {
    pub id: ReservationId,
    pub customer: String,
    pub room_id: RoomId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub room: Option<RoomInfo>,
}

impl ReservationInfo {
    pub fn hotel(&self) -> Option<&Hotel> {
        self.room.as_ref().and_then(|r| r.hotel.as_ref())
    }
}
