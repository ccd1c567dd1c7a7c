use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::recurrence::RecurrencePattern;
use crate::time::{self, TimeOfDay};

/// Minutes relative to some day's midnight. May be negative or exceed a day
/// when an interval is positioned against a neighboring day.
pub type Minute = i32;

pub const MINUTES_PER_DAY: Minute = 1440;

/// Half-open interval `[start, end)` in minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Reposition a span from a day `days` after the reference day.
    pub fn shifted_days(&self, days: i64) -> Span {
        let delta = (days * MINUTES_PER_DAY as i64) as Minute;
        Span::new(self.start + delta, self.end + delta)
    }

    /// The part of `self` inside `bounds`, if any.
    pub fn clamp_to(&self, bounds: &Span) -> Option<Span> {
        let start = self.start.max(bounds.start);
        let end = self.end.min(bounds.end);
        (start < end).then(|| Span::new(start, end))
    }

    /// Minutes between two spans; zero when they touch or overlap.
    pub fn distance(&self, other: &Span) -> Minute {
        if self.overlaps(other) {
            0
        } else if self.end <= other.start {
            other.start - self.end
        } else {
            self.start - other.end
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Scheduled,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageType {
    #[default]
    Primary,
    Backup,
    Specialist,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// A committed, assignable block of caregiving time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shift {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    /// May be at or before `start_time` for overnight shifts.
    pub end_time: TimeOfDay,
    pub assigned_to: Option<String>,
    pub status: ShiftStatus,
    pub coverage_type: CoverageType,
    pub recurrence: Option<RecurrencePattern>,
    /// Shared by every shift expanded from the same recurring draft.
    pub series_id: Option<Ulid>,
    pub handoff_notes: Option<String>,
    pub task_ids: BTreeSet<Ulid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub color: Option<String>,
}

impl Shift {
    pub fn span(&self) -> Span {
        time::span(self.start_time, self.end_time)
    }

    /// Scheduled and in-progress shifts are what count as coverage.
    pub fn is_active(&self) -> bool {
        matches!(self.status, ShiftStatus::Scheduled | ShiftStatus::InProgress)
    }

    pub fn is_assigned_to(&self, who: &str) -> bool {
        self.assigned_to.as_deref() == Some(who)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Medication,
    Appointment,
    PersonalCare,
    Meal,
    Activity,
    Errand,
    #[default]
    Other,
}

/// A time-boxed task or appointment. Participates in conflict detection
/// but never counts as coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareEvent {
    pub id: Ulid,
    pub title: String,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub assigned_to: Option<String>,
    pub category: EventCategory,
    pub priority: Priority,
    pub recurrence: Option<RecurrencePattern>,
    pub series_id: Option<Ulid>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl CareEvent {
    pub fn span(&self) -> Span {
        time::span(self.start_time, self.end_time)
    }
}

/// A care event together with its freshly computed conflict flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    #[serde(flatten)]
    pub event: CareEvent,
    pub has_conflict: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentKind {
    Shift,
    Event,
}

/// An existing commitment that collides with a candidate interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: Ulid,
    pub kind: CommitmentKind,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

/// The interval and assignee a conflict check is run for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

// ── Coverage gaps ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Identified,
    Addressed,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Reassign,
    Reschedule,
    Split,
    Cancel,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedInterval {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitPlan {
    /// First part runs up to `at`, second part from `at`.
    pub at: TimeOfDay,
    pub second_assignee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOption {
    pub id: Ulid,
    #[serde(rename = "type")]
    pub kind: ResolutionKind,
    pub description: String,
    pub suggested_assignee: Option<String>,
    pub suggested_interval: Option<SuggestedInterval>,
    /// Open shift to claim (reassign) or to derive from (reschedule).
    pub target_shift: Option<Ulid>,
    pub coverage_type: Option<CoverageType>,
    pub split: Option<SplitPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageGap {
    pub id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    /// At or before `start_time` when the gap runs past midnight.
    pub end_time: TimeOfDay,
    pub priority: Priority,
    pub status: GapStatus,
    pub options: Vec<ResolutionOption>,
    pub identified_at: DateTime<Utc>,
}

impl CoverageGap {
    pub fn span(&self) -> Span {
        time::span(self.start_time, self.end_time)
    }

    pub fn is_open(&self) -> bool {
        self.status != GapStatus::Addressed
    }
}

// ── Handoffs ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Pending,
    Acknowledged,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    pub id: Ulid,
    pub source_shift_id: Ulid,
    pub destination_shift_id: Ulid,
    pub outgoing_assignee: Option<String>,
    /// `None` while the successor shift is still open.
    pub incoming_assignee: Option<String>,
    pub notes: String,
    pub status: HandoffStatus,
    pub completed_task_ids: Vec<Ulid>,
    pub pending_task_ids: Vec<Ulid>,
    pub created_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Actors ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Caregiver,
    Coordinator,
}

/// Who is performing an operation. Always passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub role: Role,
}

impl Actor {
    pub fn caregiver(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Caregiver }
    }

    pub fn coordinator(id: impl Into<String>) -> Self {
        Self { id: id.into(), role: Role::Coordinator }
    }

    pub fn is_coordinator(&self) -> bool {
        self.role == Role::Coordinator
    }
}

// ── Per-day state ────────────────────────────────────────────────

/// Everything scheduled on one calendar day. Shifts and events are kept
/// sorted by start minute.
#[derive(Debug, Clone)]
pub struct DayState {
    pub date: NaiveDate,
    pub shifts: Vec<Shift>,
    pub events: Vec<CareEvent>,
}

impl DayState {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            shifts: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shifts.is_empty() && self.events.is_empty()
    }

    /// Insert (or replace) a shift maintaining sort order by start.
    pub fn put_shift(&mut self, shift: Shift) {
        self.remove_shift(shift.id);
        let start = shift.start_time;
        let pos = self.shifts.partition_point(|s| s.start_time <= start);
        self.shifts.insert(pos, shift);
    }

    pub fn remove_shift(&mut self, id: Ulid) -> Option<Shift> {
        let pos = self.shifts.iter().position(|s| s.id == id)?;
        Some(self.shifts.remove(pos))
    }

    pub fn shift(&self, id: Ulid) -> Option<&Shift> {
        self.shifts.iter().find(|s| s.id == id)
    }

    pub fn put_event(&mut self, event: CareEvent) {
        self.remove_event(event.id);
        let start = event.start_time;
        let pos = self.events.partition_point(|e| e.start_time <= start);
        self.events.insert(pos, event);
    }

    pub fn remove_event(&mut self, id: Ulid) -> Option<CareEvent> {
        let pos = self.events.iter().position(|e| e.id == id)?;
        Some(self.events.remove(pos))
    }

    pub fn event(&self, id: Ulid) -> Option<&CareEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Shifts whose span overlaps the query window.
    /// Skips everything starting at or after `query.end`.
    pub fn overlapping_shifts(&self, query: &Span) -> impl Iterator<Item = &Shift> {
        let right_bound = self
            .shifts
            .partition_point(|s| s.start_time.minutes() < query.end);
        self.shifts[..right_bound]
            .iter()
            .filter(move |s| s.span().end > query.start)
    }

    pub fn overlapping_events(&self, query: &Span) -> impl Iterator<Item = &CareEvent> {
        let right_bound = self
            .events
            .partition_point(|e| e.start_time.minutes() < query.end);
        self.events[..right_bound]
            .iter()
            .filter(move |e| e.span().end > query.start)
    }
}

/// Journal record format. Replaying these in order rebuilds engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    ShiftSaved(Shift),
    ShiftDeleted { id: Ulid, date: NaiveDate },
    EventSaved(CareEvent),
    EventDeleted { id: Ulid, date: NaiveDate },
    HandoffSaved(Handoff),
}

impl JournalEntry {
    /// The day this entry applies to, if it is day-scoped.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            JournalEntry::ShiftSaved(s) => Some(s.date),
            JournalEntry::EventSaved(e) => Some(e.date),
            JournalEntry::ShiftDeleted { date, .. } | JournalEntry::EventDeleted { date, .. } => {
                Some(*date)
            }
            JournalEntry::HandoffSaved(_) => None,
        }
    }
}

// ── Requests and outcomes ────────────────────────────────────────

/// What to do when a new or moved shift collides with the assignee's other commitments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Reject,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftDraft {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub coverage_type: CoverageType,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
    #[serde(default)]
    pub handoff_notes: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub task_ids: BTreeSet<Ulid>,
}

impl ShiftDraft {
    pub fn new(date: NaiveDate, start_time: TimeOfDay, end_time: TimeOfDay) -> Self {
        Self {
            date,
            start_time,
            end_time,
            assigned_to: None,
            coverage_type: CoverageType::Primary,
            recurring: false,
            recurrence_pattern: None,
            handoff_notes: None,
            color: None,
            task_ids: BTreeSet::new(),
        }
    }

    pub fn assigned(mut self, who: impl Into<String>) -> Self {
        self.assigned_to = Some(who.into());
        self
    }

    pub fn repeating(mut self, rule: RecurrencePattern) -> Self {
        self.recurring = true;
        self.recurrence_pattern = Some(rule);
        self
    }
}

/// Fields of a shift that may change after creation. Assignment changes go
/// through claim and release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftPatch {
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<TimeOfDay>,
    #[serde(default)]
    pub end_time: Option<TimeOfDay>,
    #[serde(default)]
    pub coverage_type: Option<CoverageType>,
    #[serde(default)]
    pub handoff_notes: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedShifts {
    pub shifts: Vec<Shift>,
    /// Collisions accepted under [`ConflictPolicy::Warn`].
    pub conflicts: Vec<Conflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed_task_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub shift: Shift,
    /// `None` when the handoff could not be recorded; the completion stands.
    pub handoff: Option<HandoffOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    pub title: String,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub recurring: bool,
    #[serde(default)]
    pub recurrence_pattern: Option<RecurrencePattern>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub start_time: Option<TimeOfDay>,
    #[serde(default)]
    pub end_time: Option<TimeOfDay>,
    /// `Some(None)` unassigns; on the wire that is an explicit `null`.
    #[serde(default, deserialize_with = "present_or_null")]
    pub assigned_to: Option<Option<String>>,
    #[serde(default)]
    pub category: Option<EventCategory>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

/// Tells a field that is absent (outer `None`) apart from one set to `null`.
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub required_window_start: TimeOfDay,
    pub required_window_end: TimeOfDay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomResolution {
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub coverage_type: CoverageType,
}

/// A human's pick among a gap's options, or an explicit interval of their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionChoice {
    Custom {
        #[serde(rename = "gapId")]
        gap_id: Ulid,
        custom: CustomResolution,
    },
    Chosen {
        #[serde(rename = "gapId")]
        gap_id: Ulid,
        #[serde(rename = "resolutionId")]
        resolution_id: Ulid,
    },
}

impl ResolutionChoice {
    pub fn gap_id(&self) -> Ulid {
        match self {
            ResolutionChoice::Custom { gap_id, .. } | ResolutionChoice::Chosen { gap_id, .. } => {
                *gap_id
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionOutcome {
    pub gap: CoverageGap,
    pub created_shift_ids: Vec<Ulid>,
    pub claimed_shift_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRequest {
    pub outgoing_shift_id: Ulid,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub completed_task_ids: Vec<Ulid>,
    #[serde(default)]
    pub pending_task_ids: Vec<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum HandoffOutcome {
    Created(Handoff),
    NoSuccessorFound {
        #[serde(rename = "shiftId")]
        shift_id: Ulid,
    },
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    pub fn tod(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    pub fn shift(day: &str, start: &str, end: &str, who: Option<&str>) -> Shift {
        Shift {
            id: Ulid::new(),
            date: date(day),
            start_time: tod(start),
            end_time: tod(end),
            assigned_to: who.map(str::to_string),
            status: if who.is_some() { ShiftStatus::Scheduled } else { ShiftStatus::Open },
            coverage_type: CoverageType::Primary,
            recurrence: None,
            series_id: None,
            handoff_notes: None,
            task_ids: BTreeSet::new(),
            created_by: "coordinator".into(),
            created_at: Utc::now(),
            color: None,
        }
    }

    pub fn event(day: &str, start: &str, end: &str, who: Option<&str>) -> CareEvent {
        CareEvent {
            id: Ulid::new(),
            title: "appointment".into(),
            date: date(day),
            start_time: tod(start),
            end_time: tod(end),
            assigned_to: who.map(str::to_string),
            category: EventCategory::Appointment,
            priority: Priority::Medium,
            recurrence: None,
            series_id: None,
            created_by: "coordinator".into(),
            created_at: Utc::now(),
        }
    }
}
