use ulid::Ulid;

use crate::model::{AttendanceStatus, Ms};

#[derive(Debug)]
pub enum EngineError {
    /// Booking or exam window with `start >= end`.
    InvalidInterval { start: Ms, end: Ms },
    /// Bookings for more than one resource passed to a single occupancy computation.
    MixedResource { expected: Ulid, found: Ulid },
    /// Wrong, reset or already consumed one-time code.
    CodeNotFound,
    /// Substitute check-in without remarks.
    MissingRemarks,
    /// Attendance was already finalized; the first check-in wins.
    AlreadyFinalized { id: Ulid, status: AttendanceStatus },
    /// Assignment already holds a live code.
    CodeAlreadyIssued(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    LimitExceeded(&'static str),
    /// The WAL could not durably record the change. Never retried for writes.
    PersistenceFailure(String),
}

impl EngineError {
    /// Errors a person at the check-in screen can act on.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            EngineError::CodeNotFound | EngineError::MissingRemarks | EngineError::AlreadyFinalized { .. }
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): start must be before end")
            }
            EngineError::MixedResource { expected, found } => {
                write!(f, "bookings for several resources in one computation: {expected} and {found}")
            }
            EngineError::CodeNotFound => write!(f, "code not found or already used"),
            EngineError::MissingRemarks => write!(f, "remarks are required when checking in as a substitute"),
            EngineError::AlreadyFinalized { id, status } => {
                write!(f, "attendance for {id} already recorded as {status}")
            }
            EngineError::CodeAlreadyIssued(id) => write!(f, "assignment {id} already has a code"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::PersistenceFailure(e) => write!(f, "persistence failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
