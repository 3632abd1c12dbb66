use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::error::ErrorKind;
use crate::model::InvalidSpan;

/// Which way a car conflict was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The spans share at least one day.
    Overlap,
    /// The other rental ends the day before the candidate starts.
    DayBefore,
    /// The other rental starts the day after the candidate ends.
    DayAfter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub rental_id: Ulid,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    CarNotFound(Ulid),
    UserNotFound(Ulid),
    RentalNotFound(Ulid),
    Unqualified(Ulid),
    CarConflict(Conflict),
    UserConflict(Ulid),
    InvalidInterval(InvalidSpan),
    CarInUse { id: Ulid, rentals: usize },
    UserInUse { id: Ulid, rentals: usize },
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::CarNotFound(id) => write!(f, "car not found: {id}"),
            EngineError::UserNotFound(id) => write!(f, "user not found: {id}"),
            EngineError::RentalNotFound(id) => write!(f, "rental not found: {id}"),
            EngineError::Unqualified(id) => write!(f, "user {id} is not qualified to rent"),
            EngineError::CarConflict(Conflict { rental_id, kind }) => match kind {
                ConflictKind::Overlap => write!(f, "car is already rented in this period (rental {rental_id})"),
                ConflictKind::DayBefore => {
                    write!(f, "car has a rental ending the day before this period (rental {rental_id})")
                }
                ConflictKind::DayAfter => {
                    write!(f, "car has a rental starting the day after this period (rental {rental_id})")
                }
            },
            EngineError::UserConflict(id) => {
                write!(f, "user already has a rental in this period (rental {id})")
            }
            EngineError::InvalidInterval(e) => write!(f, "invalid interval: {e}"),
            EngineError::CarInUse { id, rentals } => {
                write!(f, "cannot remove car {id}: {rentals} rental(s) on record")
            }
            EngineError::UserInUse { id, rentals } => {
                write!(f, "cannot remove user {id}: {rentals} rental(s) on record")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::CarNotFound(_) | EngineError::UserNotFound(_) | EngineError::RentalNotFound(_) => {
                ErrorKind::NotFound
            }
            EngineError::Unqualified(_) => ErrorKind::Unqualified,
            EngineError::CarConflict(_) => ErrorKind::ResourceConflict,
            EngineError::UserConflict(_) => ErrorKind::UserConflict,
            EngineError::InvalidInterval(_) => ErrorKind::InvalidInterval,
            EngineError::CarInUse { .. } | EngineError::UserInUse { .. } => ErrorKind::InUse,
            EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<InvalidSpan> for EngineError {
    fn from(e: InvalidSpan) -> Self {
        EngineError::InvalidInterval(e)
    }
}

/// A lookup that fails (rather than returning "absent") is a backend problem.
impl From<CatalogError> for EngineError {
    fn from(e: CatalogError) -> Self {
        EngineError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(e.to_string())
    }
}
