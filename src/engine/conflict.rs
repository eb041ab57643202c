use chrono::{NaiveDate, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// The calendar day reservations are validated against.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Temporal gate every requested stay passes before it reaches a conflict check.
pub fn validate_stay(stay: &Stay, today: NaiveDate) -> Result<(), EngineError> {
    if stay.start > stay.end {
        return Err(EngineError::InvalidRange {
            start: stay.start,
            end: stay.end,
        });
    }
    if stay.start < today {
        return Err(EngineError::PastStart {
            start: stay.start,
            today,
        });
    }
    Ok(())
}

/// First reservation in `existing` that `request` conflicts with.
pub fn first_conflict<'a>(
    existing: impl IntoIterator<Item = &'a (ReservationId, Stay)>,
    request: &Stay,
) -> Option<ReservationId> {
    existing
        .into_iter()
        .find(|(_, stay)| request.conflicts_with(stay))
        .map(|(id, _)| *id)
}

pub(crate) fn check_no_conflict(rs: &RoomState, request: &Stay) -> Result<(), EngineError> {
    match first_conflict(rs.candidates(request), request) {
        Some(reservation_id) => Err(EngineError::RoomAlreadyReserved {
            room_id: rs.room.id,
            reservation_id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn validate_customer(customer: &str) -> Result<(), EngineError> {
    if customer.trim().is_empty() {
        return Err(EngineError::InvalidField("customer must not be empty"));
    }
    if customer.len() > MAX_CUSTOMER_LEN {
        return Err(EngineError::LimitExceeded("customer too long"));
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> Result<(), EngineError> {
    if title.trim().is_empty() {
        return Err(EngineError::InvalidField("title must not be empty"));
    }
    if title.len() > MAX_TITLE_LEN {
        return Err(EngineError::LimitExceeded("title too long"));
    }
    Ok(())
}

pub(crate) fn validate_placement(number: u16, floor: u16) -> Result<(), EngineError> {
    if number > MAX_ROOM_NUMBER {
        return Err(EngineError::InvalidField("room number out of range"));
    }
    if floor > MAX_ROOM_NUMBER {
        return Err(EngineError::InvalidField("floor out of range"));
    }
    Ok(())
}
