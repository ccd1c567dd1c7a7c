use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

pub type SharedDay = Arc<RwLock<DayState>>;

/// Day-partitioned shifts and events plus id -> date indexes.
pub struct Roster {
    days: DashMap<NaiveDate, SharedDay>,
    shift_index: DashMap<Ulid, NaiveDate>,
    event_index: DashMap<Ulid, NaiveDate>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            shift_index: DashMap::new(),
            event_index: DashMap::new(),
        }
    }

    /// Build from fully replayed days. Indexes are derived from their contents.
    pub fn from_days(days: BTreeMap<NaiveDate, DayState>) -> Self {
        let roster = Self::new();
        for (date, day) in days {
            for s in &day.shifts {
                roster.shift_index.insert(s.id, date);
            }
            for e in &day.events {
                roster.event_index.insert(e.id, date);
            }
            roster.days.insert(date, Arc::new(RwLock::new(day)));
        }
        roster
    }

    // ── Days ─────────────────────────────────────────────────

    pub fn day(&self, date: &NaiveDate) -> Option<SharedDay> {
        self.days.get(date).map(|e| e.value().clone())
    }

    pub fn day_or_create(&self, date: NaiveDate) -> SharedDay {
        self.days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayState::new(date))))
            .value()
            .clone()
    }

    /// Every known date, ascending.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.days.iter().map(|e| *e.key()).collect();
        dates.sort();
        dates
    }

    pub fn day_count(&self) -> usize {
        self.days.len()
    }

    // ── Indexes ──────────────────────────────────────────────

    pub fn shift_date(&self, id: &Ulid) -> Option<NaiveDate> {
        self.shift_index.get(id).map(|e| *e.value())
    }

    pub fn event_date(&self, id: &Ulid) -> Option<NaiveDate> {
        self.event_index.get(id).map(|e| *e.value())
    }

    pub fn shift_count(&self) -> usize {
        self.shift_index.len()
    }

    // ── Entry application ────────────────────────────────────

    /// Apply a day-scoped entry to `day` (caller holds its lock) and keep the
    /// indexes in step. Handoff entries are not day-scoped and are ignored here.
    pub fn apply(&self, day: &mut DayState, entry: &JournalEntry) {
        apply_entry(day, entry);
        match entry {
            JournalEntry::ShiftSaved(s) => {
                self.shift_index.insert(s.id, s.date);
            }
            JournalEntry::ShiftDeleted { id, date } => {
                self.shift_index.remove_if(id, |_, d| d == date);
            }
            JournalEntry::EventSaved(e) => {
                self.event_index.insert(e.id, e.date);
            }
            JournalEntry::EventDeleted { id, date } => {
                self.event_index.remove_if(id, |_, d| d == date);
            }
            JournalEntry::HandoffSaved(_) => {}
        }
    }
}

/// Apply a day-scoped entry to a day without touching any index.
pub fn apply_entry(day: &mut DayState, entry: &JournalEntry) {
    match entry {
        JournalEntry::ShiftSaved(s) => day.put_shift(s.clone()),
        JournalEntry::ShiftDeleted { id, .. } => {
            day.remove_shift(*id);
        }
        JournalEntry::EventSaved(e) => day.put_event(e.clone()),
        JournalEntry::EventDeleted { id, .. } => {
            day.remove_event(*id);
        }
        JournalEntry::HandoffSaved(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::*;

    #[tokio::test]
    async fn apply_tracks_indexes() {
        let roster = Roster::new();
        let s = shift("2024-03-01", "09:00", "17:00", Some("ana"));
        let day = roster.day_or_create(s.date);
        let mut guard = day.write().await;

        roster.apply(&mut guard, &JournalEntry::ShiftSaved(s.clone()));
        assert_eq!(roster.shift_date(&s.id), Some(s.date));
        assert_eq!(guard.shifts.len(), 1);

        roster.apply(&mut guard, &JournalEntry::ShiftDeleted { id: s.id, date: s.date });
        assert_eq!(roster.shift_date(&s.id), None);
        assert!(guard.is_empty());
    }

    #[tokio::test]
    async fn delete_on_old_day_keeps_new_index() {
        let roster = Roster::new();
        let mut s = shift("2024-03-01", "09:00", "17:00", None);
        let old = roster.day_or_create(s.date);
        roster.apply(&mut *old.write().await, &JournalEntry::ShiftSaved(s.clone()));

        let old_date = s.date;
        s.date = date("2024-03-02");
        let new = roster.day_or_create(s.date);
        roster.apply(&mut *new.write().await, &JournalEntry::ShiftSaved(s.clone()));
        roster.apply(
            &mut *old.write().await,
            &JournalEntry::ShiftDeleted { id: s.id, date: old_date },
        );

        assert_eq!(roster.shift_date(&s.id), Some(s.date));
        assert!(old.read().await.is_empty());
    }

    #[test]
    fn from_days_builds_indexes() {
        let mut day = DayState::new(date("2024-03-01"));
        let s = shift("2024-03-01", "09:00", "17:00", None);
        let e = event("2024-03-01", "10:00", "11:00", None);
        day.put_shift(s.clone());
        day.put_event(e.clone());

        let roster = Roster::from_days(BTreeMap::from([(day.date, day)]));
        assert_eq!(roster.shift_date(&s.id), Some(s.date));
        assert_eq!(roster.event_date(&e.id), Some(e.date));
        assert_eq!(roster.dates(), vec![date("2024-03-01")]);
    }
}
