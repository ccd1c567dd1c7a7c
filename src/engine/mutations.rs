use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::recurrence::{self, RecurrencePattern};

use super::conflict::{conflicts_for, now, validate_assignee, validate_times};
use super::{Engine, EngineError};

/// Dates a draft applies to: one date, or every occurrence of its rule inside the horizon.
pub(super) fn occurrence_dates(
    origin: NaiveDate,
    recurring: bool,
    pattern: Option<&RecurrencePattern>,
    horizon_days: u64,
) -> Result<(Vec<NaiveDate>, Option<RecurrencePattern>), EngineError> {
    let rule = match (recurring, pattern) {
        (false, _) => return Ok((vec![origin], None)),
        (true, None) => {
            return Err(EngineError::InvalidRecurrenceRule("recurring draft needs a pattern"));
        }
        (true, Some(rule)) => rule,
    };
    let horizon_end = origin
        .checked_add_days(Days::new(horizon_days))
        .unwrap_or(NaiveDate::MAX);
    let dates: Vec<NaiveDate> = recurrence::expand(rule, origin, horizon_end)?
        .take(MAX_RECURRENCE_OCCURRENCES + 1)
        .collect();
    if dates.len() > MAX_RECURRENCE_OCCURRENCES {
        return Err(EngineError::LimitExceeded("too many occurrences"));
    }
    Ok((dates, Some(rule.clone())))
}

fn check_text(value: Option<&str>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(v) if v.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

pub(super) fn may_manage(actor: &Actor, created_by: &str) -> bool {
    actor.is_coordinator() || actor.id == created_by
}

fn candidate_of(shift: &Shift) -> Candidate {
    Candidate {
        date: shift.date,
        start_time: shift.start_time,
        end_time: shift.end_time,
        assigned_to: shift.assigned_to.clone(),
    }
}

impl Engine {
    /// Create one shift, or a whole series from a recurring draft. A series is
    /// validated in full before any of it is committed.
    pub async fn create_shift(
        &self,
        draft: ShiftDraft,
        actor: &Actor,
        policy: ConflictPolicy,
    ) -> Result<SavedShifts, EngineError> {
        validate_times(draft.start_time, draft.end_time)?;
        validate_assignee(draft.assigned_to.as_deref())?;
        check_text(draft.handoff_notes.as_deref(), MAX_NOTES_LEN, "handoff notes too long")?;
        check_text(draft.color.as_deref(), MAX_COLOR_LEN, "color too long")?;
        if draft.task_ids.len() > MAX_TASKS_PER_SHIFT {
            return Err(EngineError::LimitExceeded("too many tasks on shift"));
        }
        let (dates, rule) = occurrence_dates(
            draft.date,
            draft.recurring,
            draft.recurrence_pattern.as_ref(),
            self.config.recurrence_horizon_days,
        )?;

        let series_id = rule.as_ref().map(|_| Ulid::new());
        let created_at = now();
        let shifts: Vec<Shift> = dates
            .iter()
            .map(|&date| Shift {
                id: Ulid::new(),
                date,
                start_time: draft.start_time,
                end_time: draft.end_time,
                assigned_to: draft.assigned_to.clone(),
                status: if draft.assigned_to.is_some() {
                    ShiftStatus::Scheduled
                } else {
                    ShiftStatus::Open
                },
                coverage_type: draft.coverage_type,
                recurrence: rule.clone(),
                series_id,
                handoff_notes: draft.handoff_notes.clone(),
                task_ids: draft.task_ids.clone(),
                created_by: actor.id.clone(),
                created_at,
                color: draft.color.clone(),
            })
            .collect();

        let mut days = self.lock_days(dates.iter().copied()).await;

        // Phase 1: validate every occurrence against current state.
        let mut conflicts = Vec::new();
        for shift in &shifts {
            let day = days.get(&shift.date).ok_or(EngineError::NotFound(shift.id))?;
            if day.shifts.len() >= MAX_SHIFTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many shifts on day"));
            }
            let found = conflicts_for(day, &candidate_of(shift), None);
            if policy == ConflictPolicy::Reject
                && let Some(first) = found.first()
            {
                debug!(date = %shift.date, conflict = %first.id, "shift rejected");
                return Err(EngineError::Conflict(first.id));
            }
            conflicts.extend(found);
        }

        // Phase 2: commit.
        for shift in &shifts {
            let day = days.get_mut(&shift.date).ok_or(EngineError::NotFound(shift.id))?;
            self.persist_and_apply(day, &JournalEntry::ShiftSaved(shift.clone()))
                .await?;
        }

        info!(
            count = shifts.len(),
            date = %draft.date,
            assignee = ?draft.assigned_to,
            conflicts = conflicts.len(),
            "shifts created"
        );
        Ok(SavedShifts { shifts, conflicts })
    }

    /// Change a shift's time, date, type, notes or color. Moving to another
    /// date takes both days' locks.
    pub async fn update_shift(
        &self,
        id: Ulid,
        patch: ShiftPatch,
        actor: &Actor,
        policy: ConflictPolicy,
    ) -> Result<SavedShifts, EngineError> {
        check_text(patch.handoff_notes.as_deref(), MAX_NOTES_LEN, "handoff notes too long")?;
        check_text(patch.color.as_deref(), MAX_COLOR_LEN, "color too long")?;

        let old_date = self.store.shift_date(&id).ok_or(EngineError::NotFound(id))?;
        let new_date = patch.date.unwrap_or(old_date);
        let mut days = self.lock_days([old_date, new_date]).await;

        let current = days
            .get(&old_date)
            .and_then(|d| d.shift(id))
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !may_manage(actor, &current.created_by) {
            return Err(EngineError::NotPermitted("only the creator or a coordinator may edit a shift"));
        }
        if current.status == ShiftStatus::Completed {
            return Err(EngineError::InvalidShift("completed shifts cannot be edited"));
        }

        let mut updated = current.clone();
        updated.date = new_date;
        updated.start_time = patch.start_time.unwrap_or(current.start_time);
        updated.end_time = patch.end_time.unwrap_or(current.end_time);
        if let Some(coverage_type) = patch.coverage_type {
            updated.coverage_type = coverage_type;
        }
        if patch.handoff_notes.is_some() {
            updated.handoff_notes = patch.handoff_notes;
        }
        if patch.color.is_some() {
            updated.color = patch.color;
        }
        validate_times(updated.start_time, updated.end_time)?;

        let target = days.get(&new_date).ok_or(EngineError::NotFound(id))?;
        if new_date != old_date && target.shifts.len() >= MAX_SHIFTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many shifts on day"));
        }
        let conflicts = conflicts_for(target, &candidate_of(&updated), Some(id));
        if policy == ConflictPolicy::Reject
            && let Some(first) = conflicts.first()
        {
            return Err(EngineError::Conflict(first.id));
        }

        if new_date != old_date {
            let old_day = days.get_mut(&old_date).ok_or(EngineError::NotFound(id))?;
            self.persist_and_apply(old_day, &JournalEntry::ShiftDeleted { id, date: old_date })
                .await?;
        }
        let new_day = days.get_mut(&new_date).ok_or(EngineError::NotFound(id))?;
        self.persist_and_apply(new_day, &JournalEntry::ShiftSaved(updated.clone()))
            .await?;

        info!(%id, date = %new_date, "shift updated");
        Ok(SavedShifts {
            shifts: vec![updated],
            conflicts,
        })
    }

    pub async fn delete_shift(&self, id: Ulid, actor: &Actor) -> Result<Shift, EngineError> {
        let mut day = self.resolve_shift_write(id).await?;
        let shift = day.shift(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !may_manage(actor, &shift.created_by) {
            return Err(EngineError::NotPermitted("only the creator or a coordinator may delete a shift"));
        }
        self.persist_and_apply(&mut day, &JournalEntry::ShiftDeleted { id, date: shift.date })
            .await?;
        info!(%id, date = %shift.date, "shift deleted");
        Ok(shift)
    }

    /// Read-modify-write of a single shift under its day's lock.
    async fn modify_shift(
        &self,
        id: Ulid,
        change: impl FnOnce(&DayState, &Shift) -> Result<Shift, EngineError>,
    ) -> Result<Shift, EngineError> {
        let mut day = self.resolve_shift_write(id).await?;
        let current = day.shift(id).ok_or(EngineError::NotFound(id))?;
        let next = change(&*day, current)?;
        self.persist_and_apply(&mut day, &JournalEntry::ShiftSaved(next.clone()))
            .await?;
        Ok(next)
    }

    /// open -> scheduled. Of two concurrent claims exactly one wins. Caregivers
    /// claim for themselves; coordinators may claim for anyone.
    pub async fn claim(&self, id: Ulid, assignee: &str, actor: &Actor) -> Result<Shift, EngineError> {
        validate_assignee(Some(assignee))?;
        if actor.id != assignee && !actor.is_coordinator() {
            return Err(EngineError::NotPermitted("only a coordinator may claim a shift for someone else"));
        }
        let result = self
            .modify_shift(id, |day, shift| {
                if shift.status != ShiftStatus::Open {
                    return Err(EngineError::AlreadyAssigned(id));
                }
                let mut next = shift.clone();
                next.assigned_to = Some(assignee.to_string());
                next.status = ShiftStatus::Scheduled;
                if let Some(conflict) = conflicts_for(day, &candidate_of(&next), Some(id)).first() {
                    return Err(EngineError::Conflict(conflict.id));
                }
                Ok(next)
            })
            .await;
        match &result {
            Ok(_) => info!(%id, assignee, by = %actor.id, "shift claimed"),
            Err(e) => debug!(%id, assignee, error = %e, "claim rejected"),
        }
        result
    }

    /// scheduled -> open. Only the assignee or a coordinator may release.
    pub async fn release(&self, id: Ulid, actor: &Actor) -> Result<Shift, EngineError> {
        let shift = self
            .modify_shift(id, |_, shift| {
                if shift.status != ShiftStatus::Scheduled {
                    return Err(EngineError::NotScheduled(id));
                }
                if !actor.is_coordinator() && !shift.is_assigned_to(&actor.id) {
                    return Err(EngineError::NotPermitted("only the assignee or a coordinator may release a shift"));
                }
                let mut next = shift.clone();
                next.assigned_to = None;
                next.status = ShiftStatus::Open;
                Ok(next)
            })
            .await?;
        info!(%id, by = %actor.id, "shift released");
        Ok(shift)
    }

    /// scheduled -> in_progress.
    pub async fn start(&self, id: Ulid) -> Result<Shift, EngineError> {
        let shift = self
            .modify_shift(id, |_, shift| {
                if shift.status != ShiftStatus::Scheduled {
                    return Err(EngineError::NotScheduled(id));
                }
                let mut next = shift.clone();
                next.status = ShiftStatus::InProgress;
                Ok(next)
            })
            .await?;
        info!(%id, "shift started");
        Ok(shift)
    }

    /// in_progress -> completed, then a best-effort handoff to the next shift.
    /// The completion stands whether or not a handoff could be created.
    pub async fn complete(
        &self,
        id: Ulid,
        report: CompletionReport,
    ) -> Result<CompletionOutcome, EngineError> {
        check_text(report.notes.as_deref(), MAX_NOTES_LEN, "handoff notes too long")?;
        let shift = self
            .modify_shift(id, |_, shift| {
                if shift.status != ShiftStatus::InProgress {
                    return Err(EngineError::NotInProgress(id));
                }
                if report.completed_task_ids.iter().any(|t| !shift.task_ids.contains(t)) {
                    return Err(EngineError::InvalidTaskSplit("completed task is not on the shift"));
                }
                let mut next = shift.clone();
                next.status = ShiftStatus::Completed;
                if report.notes.is_some() {
                    next.handoff_notes = report.notes.clone();
                }
                Ok(next)
            })
            .await?;
        info!(%id, "shift completed");

        let completed: BTreeSet<Ulid> = report.completed_task_ids.iter().copied().collect();
        let request = HandoffRequest {
            outgoing_shift_id: id,
            notes: shift.handoff_notes.clone().unwrap_or_default(),
            completed_task_ids: completed.iter().copied().collect(),
            pending_task_ids: shift.task_ids.difference(&completed).copied().collect(),
        };
        let handoff = match self.create_handoff(request).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(%id, error = %e, "handoff after completion failed");
                None
            }
        };
        Ok(CompletionOutcome { shift, handoff })
    }

    pub async fn attach_tasks(&self, id: Ulid, task_ids: Vec<Ulid>) -> Result<Shift, EngineError> {
        self.modify_shift(id, |_, shift| {
            let mut next = shift.clone();
            next.task_ids.extend(task_ids);
            if next.task_ids.len() > MAX_TASKS_PER_SHIFT {
                return Err(EngineError::LimitExceeded("too many tasks on shift"));
            }
            Ok(next)
        })
        .await
    }

    pub async fn detach_task(&self, id: Ulid, task_id: Ulid) -> Result<Shift, EngineError> {
        self.modify_shift(id, |_, shift| {
            let mut next = shift.clone();
            if !next.task_ids.remove(&task_id) {
                return Err(EngineError::NotFound(task_id));
            }
            Ok(next)
        })
        .await
    }
}
