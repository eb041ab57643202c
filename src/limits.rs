//! Hard caps on engine state and request sizes.

pub const MAX_HOTELS: usize = 10_000;
pub const MAX_ROOMS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

pub const MAX_TITLE_LEN: usize = 100;
pub const MAX_CUSTOMER_LEN: usize = 100;

/// Room numbers and floors are positive small integers.
pub const MAX_ROOM_NUMBER: u16 = 32_767;

pub const MAX_IN_CLAUSE_IDS: usize = 1_000;
