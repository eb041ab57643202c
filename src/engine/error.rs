use chrono::NaiveDate;

use crate::model::{HotelId, ReservationId, RoomId};

#[derive(Debug)]
pub enum EngineError {
    InvalidRange {
        start: NaiveDate,
        end: NaiveDate,
    },
    PastStart {
        start: NaiveDate,
        today: NaiveDate,
    },
    RoomAlreadyReserved {
        room_id: RoomId,
        reservation_id: ReservationId,
    },
    RoomAlreadyExists {
        hotel_id: HotelId,
        floor: u16,
        number: u16,
    },
    RoomNotFound(RoomId),
    HotelNotFound(HotelId),
    InvalidField(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "start_date {start} must not be after end_date {end}")
            }
            EngineError::PastStart { start, today } => {
                write!(f, "start_date {start} is before today ({today})")
            }
            EngineError::RoomAlreadyReserved { room_id, reservation_id } => write!(
                f,
                "room {room_id} is not available in the time (reservation {reservation_id})"
            ),
            EngineError::RoomAlreadyExists { hotel_id, floor, number } => write!(
                f,
                "room {number} on floor {floor} already exists in hotel {hotel_id}"
            ),
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::HotelNotFound(id) => write!(f, "hotel not found: {id}"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
