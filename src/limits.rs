// Hard caps on request-controlled sizes.

/// Longest rental accepted, in days between start and end.
pub const MAX_RENTAL_DAYS: i64 = 3660;

/// Upper bound on a list page.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Longest protocol line (one JSON request) in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Longest free-text field (name, model, color, accessory, email).
pub const MAX_NAME_LEN: usize = 256;

pub const MAX_ACCESSORIES: usize = 32;

/// Rentals kept in one car or user ledger.
pub const MAX_RENTALS_PER_KEY: usize = 100_000;

/// Oldest model year a car may be registered with.
pub const MIN_CAR_YEAR: i32 = 1950;
