use std::collections::HashSet;

use chrono::{Days, NaiveDate, NaiveDateTime};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::time::Window;

use super::conflict::{conflicts_for, now, validate_times};
use super::coverage::{detect_day, Snapshot};
use super::events::view_of;
use super::{Engine, EngineError};

fn starts_at(shift: &Shift) -> NaiveDateTime {
    shift.date.and_time(shift.start_time.into())
}

fn ends_at(shift: &Shift) -> NaiveDateTime {
    starts_at(shift) + chrono::Duration::minutes(i64::from(shift.span().duration()))
}

impl Engine {
    pub async fn get_shift(&self, id: Ulid) -> Result<Shift, EngineError> {
        let date = self.store.shift_date(&id).ok_or(EngineError::NotFound(id))?;
        let day = self.store.day(&date).ok_or(EngineError::NotFound(id))?;
        let guard = day.read().await;
        guard.shift(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Shifts on `date`, by start time.
    pub async fn shifts_on(&self, date: NaiveDate) -> Vec<Shift> {
        match self.store.day(&date) {
            Some(day) => day.read().await.shifts.clone(),
            None => Vec::new(),
        }
    }

    /// Every shift matching `keep`, by date then start time.
    async fn collect_shifts(&self, keep: impl Fn(&Shift) -> bool) -> Vec<Shift> {
        let mut out = Vec::new();
        for date in self.store.dates() {
            let Some(day) = self.store.day(&date) else { continue };
            let guard = day.read().await;
            out.extend(guard.shifts.iter().filter(|s| keep(s)).cloned());
        }
        out
    }

    pub async fn shifts_for(&self, assignee: &str) -> Vec<Shift> {
        self.collect_shifts(|s| s.is_assigned_to(assignee)).await
    }

    /// Shifts that have not started yet as of `now`, soonest first.
    pub async fn upcoming(&self, now: NaiveDateTime, limit: usize) -> Vec<Shift> {
        let mut shifts = self
            .collect_shifts(|s| s.status != ShiftStatus::Completed && starts_at(s) >= now)
            .await;
        shifts.truncate(limit.min(MAX_QUERY_LIMIT));
        shifts
    }

    /// The assignee's shifts that are not over as of `now`, including the one in progress.
    pub async fn mine(&self, assignee: &str, now: NaiveDateTime, limit: usize) -> Vec<Shift> {
        let mut shifts = self
            .collect_shifts(|s| {
                s.is_assigned_to(assignee) && s.status != ShiftStatus::Completed && ends_at(s) > now
            })
            .await;
        shifts.sort_by_key(starts_at);
        shifts.truncate(limit.min(MAX_QUERY_LIMIT));
        shifts
    }

    /// Existing commitments that collide with `candidate`. Pure query.
    pub async fn find_conflicts(
        &self,
        candidate: &Candidate,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Conflict>, EngineError> {
        validate_times(candidate.start_time, candidate.end_time)?;
        Ok(match self.store.day(&candidate.date) {
            Some(day) => conflicts_for(&*day.read().await, candidate, exclude),
            None => Vec::new(),
        })
    }

    pub async fn get_event(&self, id: Ulid) -> Result<EventView, EngineError> {
        let date = self.store.event_date(&id).ok_or(EngineError::NotFound(id))?;
        let day = self.store.day(&date).ok_or(EngineError::NotFound(id))?;
        let guard = day.read().await;
        let event = guard.event(id).ok_or(EngineError::NotFound(id))?;
        Ok(view_of(&guard, event))
    }

    pub async fn events_on(&self, date: NaiveDate) -> Vec<EventView> {
        let Some(day) = self.store.day(&date) else {
            return Vec::new();
        };
        let guard = day.read().await;
        guard.events.iter().map(|e| view_of(&guard, e)).collect()
    }

    /// Copies of `first..=last`, read-locked one at a time in ascending order.
    pub async fn snapshot(&self, first: NaiveDate, last: NaiveDate) -> Snapshot {
        let mut days = Vec::new();
        let mut date = first;
        while date <= last {
            if let Some(day) = self.store.day(&date) {
                days.push(day.read().await.clone());
            }
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        Snapshot::new(days)
    }

    /// Scan each day of the query for uncovered parts of the required window.
    ///
    /// Re-scanning a day replaces its unaddressed gaps. Intervals that were
    /// already accepted or resolved are not reported again.
    pub async fn detect_gaps(&self, query: &GapQuery) -> Result<Vec<CoverageGap>, EngineError> {
        if query.end_date < query.start_date {
            return Err(EngineError::InvalidShift("end date must not be before start date"));
        }
        if (query.end_date - query.start_date).num_days() >= MAX_GAP_QUERY_DAYS {
            return Err(EngineError::LimitExceeded("gap query spans too many days"));
        }
        let window = Window::new(query.required_window_start, query.required_window_end);
        let first = query.start_date.pred_opt().unwrap_or(query.start_date);
        let last = query
            .end_date
            .checked_add_days(Days::new(2))
            .unwrap_or(query.end_date);
        let snapshot = self.snapshot(first, last).await;
        let identified_at = now();

        let mut found = Vec::new();
        let mut date = query.start_date;
        while date <= query.end_date {
            let addressed: HashSet<(NaiveDate, Span)> = self
                .gaps_by_day
                .get(&date)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| self.gaps.get(id))
                        .filter(|g| !g.is_open())
                        .map(|g| (g.date, g.span()))
                        .collect()
                })
                .unwrap_or_default();

            let fresh: Vec<CoverageGap> =
                detect_day(&snapshot, date, window, &self.config, identified_at)
                    .into_iter()
                    .filter(|g| !addressed.contains(&(g.date, g.span())))
                    .collect();

            let mut ids: Vec<Ulid> = Vec::new();
            if let Some((_, previous)) = self.gaps_by_day.remove(&date) {
                for id in previous {
                    let open = self.gaps.get(&id).map(|g| g.is_open());
                    match open {
                        Some(true) => {
                            self.gaps.remove(&id);
                        }
                        Some(false) => ids.push(id),
                        None => {}
                    }
                }
            }
            for gap in &fresh {
                ids.push(gap.id);
                self.gaps.insert(gap.id, gap.clone());
            }
            self.gaps_by_day.insert(date, ids);
            found.extend(fresh);

            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }
        debug!(from = %query.start_date, to = %query.end_date, gaps = found.len(), "gap scan finished");
        Ok(found)
    }

    pub fn gap(&self, id: Ulid) -> Result<CoverageGap, EngineError> {
        self.gaps
            .get(&id)
            .map(|g| g.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Forget gaps from scans of days before `date` and any gap dated before it.
    /// Returns how many gaps were dropped.
    pub fn prune_gaps_before(&self, date: NaiveDate) -> usize {
        let stale_days: Vec<NaiveDate> = self
            .gaps_by_day
            .iter()
            .map(|e| *e.key())
            .filter(|d| *d < date)
            .collect();
        let mut dropped = 0;
        for day in stale_days {
            if let Some((_, ids)) = self.gaps_by_day.remove(&day) {
                dropped += ids.iter().filter(|id| self.gaps.remove(id).is_some()).count();
            }
        }
        let before = self.gaps.len();
        self.gaps.retain(|_, g| g.date >= date);
        dropped + (before - self.gaps.len())
    }

    /// Every gap not yet addressed, by date then start time.
    pub fn open_gaps(&self) -> Vec<CoverageGap> {
        let mut gaps: Vec<CoverageGap> = self
            .gaps
            .iter()
            .filter(|g| g.is_open())
            .map(|g| g.value().clone())
            .collect();
        gaps.sort_by_key(|g| (g.date, g.start_time));
        gaps
    }
}
