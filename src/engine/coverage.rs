use std::collections::BTreeMap;

use chrono::{DateTime, Days, NaiveDate, Utc};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::model::*;
use crate::time::{TimeOfDay, Window};

use super::conflict::conflicts_for;

/// Read-only copies of consecutive days, taken under read locks.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    days: BTreeMap<NaiveDate, DayState>,
}

impl Snapshot {
    pub fn new(days: impl IntoIterator<Item = DayState>) -> Self {
        Self {
            days: days.into_iter().map(|d| (d.date, d)).collect(),
        }
    }

    pub fn day(&self, date: &NaiveDate) -> Option<&DayState> {
        self.days.get(date)
    }

    /// Shifts from the day before through the day after `date`, with spans
    /// positioned relative to `date`'s midnight.
    fn positioned(&self, date: NaiveDate) -> Vec<(&Shift, Span)> {
        let mut out = Vec::new();
        for offset in [-1i64, 0, 1] {
            let Some(other) = shift_date(date, offset) else { continue };
            let Some(day) = self.days.get(&other) else { continue };
            out.extend(day.shifts.iter().map(|s| (s, s.span().shifted_days(offset))));
        }
        out
    }
}

fn shift_date(date: NaiveDate, offset: i64) -> Option<NaiveDate> {
    if offset >= 0 {
        date.checked_add_days(Days::new(offset as u64))
    } else {
        date.checked_sub_days(Days::new(offset.unsigned_abs()))
    }
}

pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` merged.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Priority and whether the span touches the critical window.
/// `span` and the window are both taken relative to the same midnight.
fn severity(span: &Span, config: &EngineConfig) -> (Priority, bool) {
    let critical = config.critical_window.is_some_and(|w| {
        let c = w.span();
        [-1i64, 0, 1].iter().any(|&d| c.shifted_days(d).overlaps(span))
    });
    let duration = span.duration();
    let priority = if critical || duration >= config.gap_threshold_minutes {
        Priority::High
    } else if config.minor_gap_minutes.is_some_and(|m| duration < m) {
        Priority::Low
    } else {
        Priority::Medium
    };
    (priority, critical)
}

/// Uncovered parts of `window` on `date`, with options.
///
/// Coverage is the union of scheduled and in-progress shifts, including the
/// overnight spill from the previous day. A window that wraps midnight reaches
/// into the next day; gaps found there are dated on the next day.
pub fn detect_day(
    snapshot: &Snapshot,
    date: NaiveDate,
    window: Window,
    config: &EngineConfig,
    identified_at: DateTime<Utc>,
) -> Vec<CoverageGap> {
    let mut covered: Vec<Span> = snapshot
        .positioned(date)
        .into_iter()
        .filter(|(s, _)| s.is_active())
        .map(|(_, span)| span)
        .collect();
    covered.sort_by_key(|s| s.start);
    let covered = merge_overlapping(&covered);

    subtract_intervals(&[window.span()], &covered)
        .into_iter()
        .filter_map(|uncovered| {
            let (priority, critical) = severity(&uncovered, config);
            let day_offset = uncovered.start.div_euclid(MINUTES_PER_DAY);
            let gap_date = shift_date(date, i64::from(day_offset))?;
            let mut gap = CoverageGap {
                id: Ulid::new(),
                date: gap_date,
                start_time: TimeOfDay::wrapping(uncovered.start),
                end_time: TimeOfDay::wrapping(uncovered.end),
                priority,
                status: if critical { GapStatus::Critical } else { GapStatus::Identified },
                options: Vec::new(),
                identified_at,
            };
            gap.options = resolution_options(snapshot, &gap, config);
            Some(gap)
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Before,
    After,
    Backup,
}

struct Helper<'a> {
    assignee: &'a str,
    side: Side,
}

/// Caregivers near the gap who are free during it, nearest kinds first.
fn helpers<'a>(
    snapshot: &Snapshot,
    positioned: &[(&'a Shift, Span)],
    gap: &CoverageGap,
    config: &EngineConfig,
) -> Vec<Helper<'a>> {
    let gap_span = gap.span();
    let mut found: Vec<Helper<'a>> = Vec::new();
    for &(shift, span) in positioned {
        let Some(assignee) = shift.assigned_to.as_deref() else { continue };
        if shift.status == ShiftStatus::Completed || found.iter().any(|h| h.assignee == assignee) {
            continue;
        }
        let side = if span.end <= gap_span.start
            && gap_span.start - span.end <= config.proximity_minutes
        {
            Side::Before
        } else if span.start >= gap_span.end
            && span.start - gap_span.end <= config.proximity_minutes
        {
            Side::After
        } else if shift.coverage_type == CoverageType::Backup
            && span.distance(&gap_span) <= config.backup_proximity_minutes
        {
            Side::Backup
        } else {
            continue;
        };
        let candidate = Candidate {
            date: gap.date,
            start_time: gap.start_time,
            end_time: gap.end_time,
            assigned_to: Some(assignee.to_string()),
        };
        let free = snapshot
            .day(&gap.date)
            .is_none_or(|day| conflicts_for(day, &candidate, None).is_empty());
        if free {
            found.push(Helper { assignee, side });
        }
    }
    found
}

fn interval_of(date: NaiveDate, start: TimeOfDay, end: TimeOfDay) -> SuggestedInterval {
    SuggestedInterval { date, start_time: start, end_time: end }
}

fn option(kind: ResolutionKind, description: String) -> ResolutionOption {
    ResolutionOption {
        id: Ulid::new(),
        kind,
        description,
        suggested_assignee: None,
        suggested_interval: None,
        target_shift: None,
        coverage_type: None,
        split: None,
    }
}

/// Ordered options for closing `gap`: reassign, reschedule, split, cancel, custom.
pub fn resolution_options(
    snapshot: &Snapshot,
    gap: &CoverageGap,
    config: &EngineConfig,
) -> Vec<ResolutionOption> {
    let positioned = snapshot.positioned(gap.date);
    let gap_span = gap.span();
    let helpers = helpers(snapshot, &positioned, gap, config);
    let gap_interval = interval_of(gap.date, gap.start_time, gap.end_time);
    let mut options = Vec::new();

    let open_cover = positioned
        .iter()
        .find(|(s, span)| s.status == ShiftStatus::Open && span.contains_span(&gap_span))
        .map(|(s, _)| *s);

    for helper in &helpers {
        let mut opt = match open_cover {
            Some(open) => {
                let mut o = option(
                    ResolutionKind::Reassign,
                    format!(
                        "Ask {} to take the open {}-{} shift on {}",
                        helper.assignee, open.start_time, open.end_time, open.date
                    ),
                );
                o.target_shift = Some(open.id);
                o.suggested_interval = Some(interval_of(open.date, open.start_time, open.end_time));
                o
            }
            None => {
                let mut o = option(
                    ResolutionKind::Reassign,
                    format!(
                        "Ask {} to cover {}-{} on {}",
                        helper.assignee, gap.start_time, gap.end_time, gap.date
                    ),
                );
                o.suggested_interval = Some(gap_interval.clone());
                o
            }
        };
        opt.suggested_assignee = Some(helper.assignee.to_string());
        options.push(opt);
    }

    if let Some(first_free) = helpers.first() {
        for (open, span) in &positioned {
            if open.status != ShiftStatus::Open
                || open_cover.is_some_and(|c| c.id == open.id)
                || span.distance(&gap_span) > config.proximity_minutes
            {
                continue;
            }
            let mut o = option(
                ResolutionKind::Reschedule,
                format!(
                    "Reschedule the open {}-{} shift to {}-{} with {}",
                    open.start_time, open.end_time, gap.start_time, gap.end_time, first_free.assignee
                ),
            );
            o.suggested_assignee = Some(first_free.assignee.to_string());
            o.suggested_interval = Some(gap_interval.clone());
            o.target_shift = Some(open.id);
            o.coverage_type = Some(open.coverage_type);
            options.push(o);
        }
    }

    let before = helpers.iter().find(|h| h.side == Side::Before);
    let after = helpers
        .iter()
        .find(|h| h.side == Side::After && before.is_none_or(|b| b.assignee != h.assignee));
    if let (Some(before), Some(after)) = (before, after)
        && gap_span.duration() >= 2
    {
        let at = TimeOfDay::wrapping(gap_span.start + gap_span.duration() / 2);
        let mut o = option(
            ResolutionKind::Split,
            format!(
                "Split {}-{}: {} until {at}, {} from {at}",
                gap.start_time, gap.end_time, before.assignee, after.assignee
            ),
        );
        o.suggested_assignee = Some(before.assignee.to_string());
        o.suggested_interval = Some(gap_interval.clone());
        o.split = Some(SplitPlan {
            at,
            second_assignee: Some(after.assignee.to_string()),
        });
        options.push(o);
    }

    if gap.priority != Priority::High {
        options.push(option(
            ResolutionKind::Cancel,
            format!("Accept reduced coverage {}-{} on {}", gap.start_time, gap.end_time, gap.date),
        ));
    }

    options.push(option(
        ResolutionKind::Custom,
        "Arrange coverage another way".to_string(),
    ));
    options
}
