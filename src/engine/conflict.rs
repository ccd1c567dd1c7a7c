use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;
use crate::time::TimeOfDay;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Reject zero-length intervals. `00:00-00:00` is the only equal pair allowed
/// and means a full day.
pub(crate) fn validate_times(start: TimeOfDay, end: TimeOfDay) -> Result<(), EngineError> {
    if start == end && start != TimeOfDay::MIDNIGHT {
        return Err(EngineError::InvalidShift("start and end must differ"));
    }
    Ok(())
}

pub(crate) fn validate_assignee(assignee: Option<&str>) -> Result<(), EngineError> {
    use crate::limits::MAX_ID_LEN;
    match assignee {
        Some(a) if a.trim().is_empty() => Err(EngineError::InvalidShift("assignee must not be blank")),
        Some(a) if a.len() > MAX_ID_LEN => Err(EngineError::LimitExceeded("assignee id too long")),
        _ => Ok(()),
    }
}

/// Shifts and events on `day` that are held by the candidate's assignee and
/// overlap the candidate interval. Unassigned candidates never conflict.
pub fn conflicts_for(day: &DayState, candidate: &Candidate, exclude: Option<Ulid>) -> Vec<Conflict> {
    let Some(assignee) = candidate.assigned_to.as_deref() else {
        return Vec::new();
    };
    let span = crate::time::span(candidate.start_time, candidate.end_time);
    let skip = |id: Ulid| exclude == Some(id);

    let shifts = day
        .overlapping_shifts(&span)
        .filter(|s| !skip(s.id) && s.is_assigned_to(assignee))
        .map(|s| Conflict {
            id: s.id,
            kind: CommitmentKind::Shift,
            date: s.date,
            start_time: s.start_time,
            end_time: s.end_time,
        });
    let events = day
        .overlapping_events(&span)
        .filter(|e| !skip(e.id) && e.assigned_to.as_deref() == Some(assignee))
        .map(|e| Conflict {
            id: e.id,
            kind: CommitmentKind::Event,
            date: e.date,
            start_time: e.start_time,
            end_time: e.end_time,
        });
    shifts.chain(events).collect()
}
