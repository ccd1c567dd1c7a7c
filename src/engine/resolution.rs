use std::collections::BTreeSet;

use chrono::{Days, NaiveDate};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::MAX_SHIFTS_PER_DAY;
use crate::model::*;
use crate::time::{self, TimeOfDay};

use super::conflict::{conflicts_for, now, validate_assignee, validate_times};
use super::{Engine, EngineError};

/// What a chosen option does to the roster.
enum Plan {
    /// Accept reduced coverage.
    Accept,
    Claim {
        shift_id: Ulid,
        date: NaiveDate,
        assignee: String,
    },
    Create(Vec<Shift>),
}

fn failed(gap_id: Ulid, reason: impl Into<String>) -> EngineError {
    EngineError::ResolutionFailed {
        gap_id,
        reason: reason.into(),
    }
}

fn new_shift(
    date: NaiveDate,
    start_time: TimeOfDay,
    end_time: TimeOfDay,
    assignee: Option<String>,
    coverage_type: CoverageType,
    actor: &Actor,
) -> Shift {
    Shift {
        id: Ulid::new(),
        date,
        start_time,
        end_time,
        status: if assignee.is_some() { ShiftStatus::Scheduled } else { ShiftStatus::Open },
        assigned_to: assignee,
        coverage_type,
        recurrence: None,
        series_id: None,
        handoff_notes: None,
        task_ids: BTreeSet::new(),
        created_by: actor.id.clone(),
        created_at: now(),
        color: None,
    }
}

impl Engine {
    fn plan_for(
        &self,
        gap: &CoverageGap,
        choice: &ResolutionChoice,
        actor: &Actor,
    ) -> Result<Plan, EngineError> {
        let resolution_id = match choice {
            ResolutionChoice::Custom { custom, .. } => {
                return Ok(Plan::Create(vec![new_shift(
                    custom.date,
                    custom.start_time,
                    custom.end_time,
                    custom.assigned_to.clone(),
                    custom.coverage_type,
                    actor,
                )]));
            }
            ResolutionChoice::Chosen { resolution_id, .. } => *resolution_id,
        };
        let option = gap
            .options
            .iter()
            .find(|o| o.id == resolution_id)
            .ok_or(EngineError::NotFound(resolution_id))?;
        let interval = option.suggested_interval.clone().unwrap_or(SuggestedInterval {
            date: gap.date,
            start_time: gap.start_time,
            end_time: gap.end_time,
        });
        let assignee = || {
            option
                .suggested_assignee
                .clone()
                .ok_or_else(|| failed(gap.id, "option has no suggested assignee"))
        };

        Ok(match option.kind {
            ResolutionKind::Cancel => Plan::Accept,
            ResolutionKind::Custom => {
                return Err(failed(gap.id, "custom resolution needs an explicit interval"));
            }
            ResolutionKind::Reassign => match option.target_shift {
                Some(shift_id) => Plan::Claim {
                    shift_id,
                    date: self
                        .store
                        .shift_date(&shift_id)
                        .ok_or_else(|| failed(gap.id, "target shift no longer exists"))?,
                    assignee: assignee()?,
                },
                None => Plan::Create(vec![new_shift(
                    interval.date,
                    interval.start_time,
                    interval.end_time,
                    Some(assignee()?),
                    option.coverage_type.unwrap_or_default(),
                    actor,
                )]),
            },
            ResolutionKind::Reschedule => Plan::Create(vec![new_shift(
                interval.date,
                interval.start_time,
                interval.end_time,
                Some(assignee()?),
                option.coverage_type.unwrap_or_default(),
                actor,
            )]),
            ResolutionKind::Split => {
                let split = option
                    .split
                    .as_ref()
                    .ok_or_else(|| failed(gap.id, "split option has no split point"))?;
                let coverage_type = option.coverage_type.unwrap_or_default();
                // The second part starts on the next day once the split point passes midnight.
                let gap_span = time::span(interval.start_time, interval.end_time);
                let mut at = split.at.minutes();
                if at < gap_span.start {
                    at += MINUTES_PER_DAY;
                }
                let days_on = at.div_euclid(MINUTES_PER_DAY).unsigned_abs();
                let second_date = interval
                    .date
                    .checked_add_days(Days::new(u64::from(days_on)))
                    .ok_or_else(|| failed(gap.id, "split point out of range"))?;
                Plan::Create(vec![
                    new_shift(
                        interval.date,
                        interval.start_time,
                        split.at,
                        Some(assignee()?),
                        coverage_type,
                        actor,
                    ),
                    new_shift(
                        second_date,
                        split.at,
                        interval.end_time,
                        split.second_assignee.clone(),
                        coverage_type,
                        actor,
                    ),
                ])
            }
        })
    }

    /// Apply the chosen option for a gap. Everything the option needs is
    /// validated under the affected days' write locks; on failure nothing is
    /// committed and the gap is left as it was.
    pub async fn apply_resolution(
        &self,
        choice: ResolutionChoice,
        actor: &Actor,
    ) -> Result<ResolutionOutcome, EngineError> {
        let gap_id = choice.gap_id();
        let gap = self.gap(gap_id)?;
        if !gap.is_open() {
            return Err(failed(gap_id, "gap already addressed"));
        }
        let plan = self.plan_for(&gap, &choice, actor)?;

        let mut dates = vec![gap.date];
        match &plan {
            Plan::Accept => {}
            Plan::Claim { date, .. } => dates.push(*date),
            Plan::Create(shifts) => dates.extend(shifts.iter().map(|s| s.date)),
        }
        let mut days = self.lock_days(dates).await;

        // The gap day's lock serializes resolutions of the same gap.
        if !self.gap(gap_id)?.is_open() {
            return Err(failed(gap_id, "gap already addressed"));
        }

        let mut created = Vec::new();
        let mut claimed = Vec::new();
        match plan {
            Plan::Accept => {}
            Plan::Claim { shift_id, date, assignee } => {
                let day = days.get(&date).ok_or_else(|| failed(gap_id, "target shift no longer exists"))?;
                let shift = day
                    .shift(shift_id)
                    .ok_or_else(|| failed(gap_id, "target shift no longer exists"))?;
                if shift.status != ShiftStatus::Open {
                    return Err(failed(gap_id, "target shift is no longer open"));
                }
                let mut next = shift.clone();
                next.assigned_to = Some(assignee.clone());
                next.status = ShiftStatus::Scheduled;
                let candidate = Candidate {
                    date,
                    start_time: next.start_time,
                    end_time: next.end_time,
                    assigned_to: Some(assignee.clone()),
                };
                if !conflicts_for(day, &candidate, Some(shift_id)).is_empty() {
                    return Err(failed(gap_id, format!("{assignee} has a conflicting commitment")));
                }
                let day = days.get_mut(&date).ok_or_else(|| failed(gap_id, "target shift no longer exists"))?;
                self.persist_and_apply(day, &JournalEntry::ShiftSaved(next)).await?;
                claimed.push(shift_id);
            }
            Plan::Create(shifts) => {
                for shift in &shifts {
                    validate_times(shift.start_time, shift.end_time)
                        .and_then(|()| validate_assignee(shift.assigned_to.as_deref()))
                        .map_err(|e| failed(gap_id, e.to_string()))?;
                    let day = days
                        .get(&shift.date)
                        .ok_or_else(|| failed(gap_id, "day unavailable"))?;
                    if day.shifts.len() >= MAX_SHIFTS_PER_DAY {
                        return Err(failed(gap_id, "too many shifts on day"));
                    }
                    let candidate = Candidate {
                        date: shift.date,
                        start_time: shift.start_time,
                        end_time: shift.end_time,
                        assigned_to: shift.assigned_to.clone(),
                    };
                    if !conflicts_for(day, &candidate, None).is_empty() {
                        let who = shift.assigned_to.as_deref().unwrap_or_default();
                        return Err(failed(gap_id, format!("{who} has a conflicting commitment")));
                    }
                }
                for shift in shifts {
                    let day = days
                        .get_mut(&shift.date)
                        .ok_or_else(|| failed(gap_id, "day unavailable"))?;
                    created.push(shift.id);
                    self.persist_and_apply(day, &JournalEntry::ShiftSaved(shift)).await?;
                }
            }
        }

        let mut addressed = gap;
        addressed.status = GapStatus::Addressed;
        match self.gaps.get_mut(&gap_id) {
            Some(mut entry) => entry.status = GapStatus::Addressed,
            None => warn!(gap = %gap_id, "gap replaced by a rescan while being resolved"),
        }
        drop(days);

        info!(gap = %gap_id, date = %addressed.date, created = created.len(), claimed = claimed.len(), by = %actor.id, "gap resolved");
        Ok(ResolutionOutcome {
            gap: addressed,
            created_shift_ids: created,
            claimed_shift_ids: claimed,
        })
    }
}
