use ulid::Ulid;

use crate::model::HandoffStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidTimeFormat(String),
    InvalidShift(&'static str),
    InvalidRecurrenceRule(&'static str),
    NotFound(Ulid),
    AlreadyAssigned(Ulid),
    NotScheduled(Ulid),
    NotInProgress(Ulid),
    Conflict(Ulid),
    NotPermitted(&'static str),
    ResolutionFailed {
        gap_id: Ulid,
        reason: String,
    },
    InvalidTaskSplit(&'static str),
    InvalidHandoffTransition {
        id: Ulid,
        from: HandoffStatus,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable snake_case name, used on the wire and as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidTimeFormat(_) => "invalid_time_format",
            EngineError::InvalidShift(_) => "invalid_shift",
            EngineError::InvalidRecurrenceRule(_) => "invalid_recurrence_rule",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyAssigned(_) => "already_assigned",
            EngineError::NotScheduled(_) => "not_scheduled",
            EngineError::NotInProgress(_) => "not_in_progress",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotPermitted(_) => "not_permitted",
            EngineError::ResolutionFailed { .. } => "resolution_failed",
            EngineError::InvalidTaskSplit(_) => "invalid_task_split",
            EngineError::InvalidHandoffTransition { .. } => "invalid_handoff_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeFormat(raw) => {
                write!(f, "invalid time {raw:?}: expected HH:MM")
            }
            EngineError::InvalidShift(msg) => write!(f, "invalid shift: {msg}"),
            EngineError::InvalidRecurrenceRule(msg) => write!(f, "invalid recurrence rule: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyAssigned(id) => write!(f, "shift {id} is already assigned"),
            EngineError::NotScheduled(id) => write!(f, "shift {id} is not scheduled"),
            EngineError::NotInProgress(id) => write!(f, "shift {id} is not in progress"),
            EngineError::Conflict(id) => write!(f, "conflict with commitment: {id}"),
            EngineError::NotPermitted(msg) => write!(f, "not permitted: {msg}"),
            EngineError::ResolutionFailed { gap_id, reason } => {
                write!(f, "resolution of gap {gap_id} failed: {reason}")
            }
            EngineError::InvalidTaskSplit(msg) => write!(f, "invalid task split: {msg}"),
            EngineError::InvalidHandoffTransition { id, from } => {
                write!(f, "handoff {id} cannot move on from {from:?}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
