// ⚠️ Errors - validation, conflict and storage failures of the engine

use thiserror::Error;

// ============================================================================
// CONFLICTS
// ============================================================================

/// Why a write was refused because the target is occupied or blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The whole day is blocked.
    DayBlocked,
    /// The specific (date, time) slot is blocked.
    TimeBlocked,
    /// Another appointment is already scheduled in the slot.
    SlotTaken,
    /// A day block already exists for the date.
    DayAlreadyBlocked,
    /// A time block already exists for the slot.
    TimeAlreadyBlocked,
    /// The day still has scheduled appointments.
    DayHasAppointments,
}

impl ConflictReason {
    /// Machine-readable code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            ConflictReason::DayBlocked => "day_blocked",
            ConflictReason::TimeBlocked => "time_blocked",
            ConflictReason::SlotTaken => "slot_taken",
            ConflictReason::DayAlreadyBlocked => "day_already_blocked",
            ConflictReason::TimeAlreadyBlocked => "time_already_blocked",
            ConflictReason::DayHasAppointments => "day_has_appointments",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ConflictReason::DayBlocked => "Date is not available for appointments",
            ConflictReason::TimeBlocked => "Time slot is not available",
            ConflictReason::SlotTaken => "Time slot is already taken",
            ConflictReason::DayAlreadyBlocked => "This day is already blocked",
            ConflictReason::TimeAlreadyBlocked => "This time slot is already blocked",
            ConflictReason::DayHasAppointments => "This day has scheduled appointments",
        }
    }
}

impl std::fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ============================================================================
// ENGINE ERROR
// ============================================================================

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Conflict: {0}")]
    Conflict(ConflictReason),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScheduleError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ScheduleError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        ScheduleError::NotFound { entity, id }
    }

    /// Conflict reason, if this is a conflict.
    pub fn conflict_reason(&self) -> Option<ConflictReason> {
        match self {
            ScheduleError::Conflict(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// True when a SQLite error is a constraint violation (unique index hit).
pub(crate) fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
