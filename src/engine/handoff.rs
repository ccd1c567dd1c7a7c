use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::{MAX_NOTES_LEN, MAX_QUERY_LIMIT};
use crate::model::*;

use super::conflict::now;
use super::{Engine, EngineError};

/// The shift that takes over after `outgoing`: the earliest unfinished shift
/// on the same day starting at or after it ends, else the earliest on the
/// next day. An overnight outgoing shift ends on the next day, so next-day
/// shifts must start at or after that end.
pub fn find_successor<'a>(
    outgoing: &Shift,
    same_day: &'a DayState,
    next_day: Option<&'a DayState>,
) -> Option<&'a Shift> {
    let end = outgoing.span().end;
    let eligible = |s: &&Shift| s.id != outgoing.id && s.status != ShiftStatus::Completed;

    // Shifts are sorted by start, so the first match is the earliest.
    if let Some(found) = same_day
        .shifts
        .iter()
        .filter(eligible)
        .find(|s| s.start_time.minutes() >= end)
    {
        return Some(found);
    }
    let next_floor = end - MINUTES_PER_DAY;
    next_day?
        .shifts
        .iter()
        .filter(eligible)
        .find(|s| s.start_time.minutes() >= next_floor)
}

/// `completed` and `pending` must partition `on_shift` exactly.
pub fn check_task_split(
    on_shift: &BTreeSet<Ulid>,
    completed: &[Ulid],
    pending: &[Ulid],
) -> Result<(), EngineError> {
    let mut seen = HashSet::with_capacity(completed.len() + pending.len());
    for id in completed.iter().chain(pending) {
        if !seen.insert(*id) {
            return Err(EngineError::InvalidTaskSplit("task listed twice"));
        }
        if !on_shift.contains(id) {
            return Err(EngineError::InvalidTaskSplit("task is not on the shift"));
        }
    }
    if seen.len() != on_shift.len() {
        return Err(EngineError::InvalidTaskSplit("every task must be completed or pending"));
    }
    Ok(())
}

impl Engine {
    /// Record the handover from a shift to its successor. Calling again for
    /// the same outgoing shift returns the existing record.
    pub async fn create_handoff(&self, request: HandoffRequest) -> Result<HandoffOutcome, EngineError> {
        if request.notes.len() > MAX_NOTES_LEN {
            return Err(EngineError::LimitExceeded("handoff notes too long"));
        }
        let _gate = self.handoff_gate.lock().await;

        let shift_id = request.outgoing_shift_id;
        if let Some(existing) = self
            .handoff_by_shift
            .get(&shift_id)
            .and_then(|id| self.handoffs.get(&*id).map(|h| h.value().clone()))
        {
            debug!(shift = %shift_id, handoff = %existing.id, "handoff already recorded");
            return Ok(HandoffOutcome::Created(existing));
        }

        let date = self.store.shift_date(&shift_id).ok_or(EngineError::NotFound(shift_id))?;
        let next_date = date.succ_opt();
        let same_day = self.store.day(&date).ok_or(EngineError::NotFound(shift_id))?;
        let same_guard = same_day.read().await;
        let next_day = next_date.and_then(|d| self.store.day(&d));
        let next_guard = match &next_day {
            Some(day) => Some(day.read().await),
            None => None,
        };

        let outgoing = same_guard.shift(shift_id).ok_or(EngineError::NotFound(shift_id))?;
        check_task_split(&outgoing.task_ids, &request.completed_task_ids, &request.pending_task_ids)?;

        let Some(successor) = find_successor(outgoing, &same_guard, next_guard.as_deref()) else {
            info!(shift = %shift_id, "no successor for handoff");
            return Ok(HandoffOutcome::NoSuccessorFound { shift_id });
        };

        let handoff = Handoff {
            id: Ulid::new(),
            source_shift_id: shift_id,
            destination_shift_id: successor.id,
            outgoing_assignee: outgoing.assigned_to.clone(),
            incoming_assignee: successor.assigned_to.clone(),
            notes: request.notes,
            status: HandoffStatus::Pending,
            completed_task_ids: request.completed_task_ids,
            pending_task_ids: request.pending_task_ids,
            created_at: now(),
            acknowledged_at: None,
            completed_at: None,
        };
        drop(next_guard);
        drop(same_guard);

        self.persist_handoff(&handoff).await?;
        info!(
            handoff = %handoff.id,
            from = %handoff.source_shift_id,
            to = %handoff.destination_shift_id,
            "handoff created"
        );
        Ok(HandoffOutcome::Created(handoff))
    }

    /// Move a handoff one step forward. Only the incoming caregiver or a
    /// coordinator may do so.
    async fn advance_handoff(
        &self,
        id: Ulid,
        actor: &Actor,
        from: HandoffStatus,
        to: HandoffStatus,
    ) -> Result<Handoff, EngineError> {
        let _gate = self.handoff_gate.lock().await;
        let mut handoff = self.get_handoff(id)?;

        // The successor may have been claimed after the handoff was recorded.
        if handoff.incoming_assignee.is_none()
            && let Ok(destination) = self.get_shift(handoff.destination_shift_id).await
        {
            handoff.incoming_assignee = destination.assigned_to;
        }
        let is_receiver = handoff.incoming_assignee.as_deref() == Some(actor.id.as_str());
        if !is_receiver && !actor.is_coordinator() {
            return Err(EngineError::NotPermitted("only the incoming caregiver or a coordinator may update a handoff"));
        }
        if handoff.status != from {
            return Err(EngineError::InvalidHandoffTransition { id, from: handoff.status });
        }

        let at = now();
        handoff.status = to;
        match to {
            HandoffStatus::Acknowledged => handoff.acknowledged_at = Some(at),
            HandoffStatus::Completed => handoff.completed_at = Some(at),
            HandoffStatus::Pending => {}
        }
        self.persist_handoff(&handoff).await?;
        info!(%id, status = ?to, by = %actor.id, "handoff advanced");
        Ok(handoff)
    }

    /// pending -> acknowledged.
    pub async fn acknowledge_handoff(&self, id: Ulid, actor: &Actor) -> Result<Handoff, EngineError> {
        self.advance_handoff(id, actor, HandoffStatus::Pending, HandoffStatus::Acknowledged)
            .await
    }

    /// acknowledged -> completed.
    pub async fn complete_handoff(&self, id: Ulid, actor: &Actor) -> Result<Handoff, EngineError> {
        self.advance_handoff(id, actor, HandoffStatus::Acknowledged, HandoffStatus::Completed)
            .await
    }

    pub fn get_handoff(&self, id: Ulid) -> Result<Handoff, EngineError> {
        self.handoffs
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    pub fn handoff_for_shift(&self, shift_id: Ulid) -> Option<Handoff> {
        let id = *self.handoff_by_shift.get(&shift_id)?;
        self.handoffs.get(&id).map(|h| h.value().clone())
    }

    /// Handoffs waiting on `assignee`, oldest first.
    pub fn pending_handoffs_for(&self, assignee: &str) -> Vec<Handoff> {
        let mut pending: Vec<Handoff> = self
            .handoffs
            .iter()
            .filter(|h| {
                h.status != HandoffStatus::Completed
                    && h.incoming_assignee.as_deref() == Some(assignee)
            })
            .map(|h| h.value().clone())
            .collect();
        pending.sort_by_key(|h| h.created_at);
        pending.truncate(MAX_QUERY_LIMIT);
        pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    fn day(d: &str, shifts: &[&Shift]) -> DayState {
        let mut state = DayState::new(date(d));
        for s in shifts {
            state.put_shift((*s).clone());
        }
        state
    }

    #[test]
    fn successor_same_day() {
        let out = shift("2024-03-01", "06:00", "14:00", Some("ana"));
        let early = shift("2024-03-01", "10:00", "12:00", Some("cy"));
        let next = shift("2024-03-01", "14:00", "22:00", Some("ben"));
        let later = shift("2024-03-01", "18:00", "22:00", Some("dee"));
        let today = day("2024-03-01", &[&out, &early, &next, &later]);
        assert_eq!(find_successor(&out, &today, None).map(|s| s.id), Some(next.id));
    }

    #[test]
    fn successor_skips_completed_and_falls_to_next_day() {
        let out = shift("2024-03-01", "14:00", "22:00", Some("ana"));
        let mut done = shift("2024-03-01", "22:00", "23:00", Some("cy"));
        done.status = ShiftStatus::Completed;
        let tomorrow_first = shift("2024-03-02", "06:00", "14:00", None);
        let today = day("2024-03-01", &[&out, &done]);
        let tomorrow = day("2024-03-02", &[&tomorrow_first]);
        assert_eq!(
            find_successor(&out, &today, Some(&tomorrow)).map(|s| s.id),
            Some(tomorrow_first.id)
        );
    }

    #[test]
    fn overnight_outgoing_skips_shifts_it_overlaps() {
        let out = shift("2024-03-01", "22:00", "06:00", Some("ana"));
        let overlapped = shift("2024-03-02", "02:00", "04:00", Some("cy"));
        let morning = shift("2024-03-02", "06:00", "14:00", Some("ben"));
        let today = day("2024-03-01", &[&out]);
        let tomorrow = day("2024-03-02", &[&overlapped, &morning]);
        assert_eq!(find_successor(&out, &today, Some(&tomorrow)).map(|s| s.id), Some(morning.id));
    }

    #[test]
    fn no_successor() {
        let out = shift("2024-03-01", "14:00", "22:00", Some("ana"));
        let today = day("2024-03-01", &[&out]);
        assert!(find_successor(&out, &today, None).is_none());
    }

    #[test]
    fn task_split_must_partition() {
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let tasks = BTreeSet::from([a, b, c]);
        assert!(check_task_split(&tasks, &[a], &[b, c]).is_ok());
        assert!(check_task_split(&tasks, &[a, b, c], &[]).is_ok());
        assert!(matches!(
            check_task_split(&tasks, &[a], &[b]),
            Err(EngineError::InvalidTaskSplit(_))
        ));
        assert!(matches!(
            check_task_split(&tasks, &[a, b], &[b, c]),
            Err(EngineError::InvalidTaskSplit(_))
        ));
        assert!(matches!(
            check_task_split(&tasks, &[a, b, c], &[Ulid::new()]),
            Err(EngineError::InvalidTaskSplit(_))
        ));
        assert!(check_task_split(&BTreeSet::new(), &[], &[]).is_ok());
    }
}
