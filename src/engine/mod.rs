mod conflict;
mod coverage;
mod error;
mod events;
mod handoff;
mod mutations;
mod queries;
mod resolution;
mod store;

pub use conflict::conflicts_for;
pub use coverage::{detect_day, merge_overlapping, resolution_options, subtract_intervals, Snapshot};
pub use error::EngineError;
pub use handoff::{check_task_split, find_successor};
pub use store::{Roster, SharedDay};

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::config::EngineConfig;
use crate::journal::{Journal, NullJournal};
use crate::model::*;
use crate::wal::WalJournal;

/// The scheduling engine for one care circle.
pub struct Engine {
    pub(super) store: Roster,
    /// Latest detected gaps by id.
    pub(super) gaps: DashMap<Ulid, CoverageGap>,
    /// Scanned day -> ids of the gaps found when that day was last scanned.
    pub(super) gaps_by_day: DashMap<NaiveDate, Vec<Ulid>>,
    pub(super) handoffs: DashMap<Ulid, Handoff>,
    /// Outgoing shift id -> handoff id.
    pub(super) handoff_by_shift: DashMap<Ulid, Ulid>,
    /// Serializes handoff creation and transitions.
    pub(super) handoff_gate: Mutex<()>,
    journal: Arc<dyn Journal>,
    pub(super) config: EngineConfig,
}

/// Write guards over several days, acquired in ascending date order.
pub(super) struct DayLocks {
    guards: BTreeMap<NaiveDate, OwnedRwLockWriteGuard<DayState>>,
}

impl DayLocks {
    pub(super) fn get(&self, date: &NaiveDate) -> Option<&DayState> {
        self.guards.get(date).map(|g| &**g)
    }

    pub(super) fn get_mut(&mut self, date: &NaiveDate) -> Option<&mut DayState> {
        self.guards.get_mut(date).map(|g| &mut **g)
    }
}

impl Engine {
    /// Engine with no durability.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_journal(Arc::new(NullJournal), config, Vec::new())
    }

    /// Engine backed by a WAL at `wal_path`. Must run inside a tokio runtime.
    pub fn open(wal_path: &Path, config: EngineConfig) -> io::Result<Self> {
        let (journal, entries) = WalJournal::open(wal_path)?;
        Ok(Self::with_journal(Arc::new(journal), config, entries))
    }

    /// Engine over any journal, rebuilt from previously journaled `replay` entries.
    pub fn with_journal(
        journal: Arc<dyn Journal>,
        config: EngineConfig,
        replay: Vec<JournalEntry>,
    ) -> Self {
        // Rebuild plain day states first; nothing is shared yet so no locking is needed.
        let mut days: BTreeMap<NaiveDate, DayState> = BTreeMap::new();
        let handoffs = DashMap::new();
        let handoff_by_shift = DashMap::new();
        for entry in &replay {
            match entry {
                JournalEntry::HandoffSaved(h) => {
                    handoff_by_shift.insert(h.source_shift_id, h.id);
                    handoffs.insert(h.id, h.clone());
                }
                other => {
                    if let Some(date) = other.date() {
                        let day = days.entry(date).or_insert_with(|| DayState::new(date));
                        store::apply_entry(day, other);
                    }
                }
            }
        }
        days.retain(|_, day| !day.is_empty());

        if !replay.is_empty() {
            tracing::info!(
                entries = replay.len(),
                days = days.len(),
                handoffs = handoffs.len(),
                "replayed journal"
            );
        }

        Self {
            store: Roster::from_days(days),
            gaps: DashMap::new(),
            gaps_by_day: DashMap::new(),
            handoffs,
            handoff_by_shift,
            handoff_gate: Mutex::new(()),
            journal,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Journal + apply in one call.
    pub(super) async fn persist_and_apply(
        &self,
        day: &mut DayState,
        entry: &JournalEntry,
    ) -> Result<(), EngineError> {
        self.journal.append(entry).await?;
        self.store.apply(day, entry);
        Ok(())
    }

    pub(super) async fn persist_handoff(&self, handoff: &Handoff) -> Result<(), EngineError> {
        self.journal
            .append(&JournalEntry::HandoffSaved(handoff.clone()))
            .await?;
        self.handoff_by_shift.insert(handoff.source_shift_id, handoff.id);
        self.handoffs.insert(handoff.id, handoff.clone());
        Ok(())
    }

    /// Acquire write locks on every listed day, in ascending order so that
    /// concurrent multi-day operations cannot deadlock.
    pub(super) async fn lock_days(&self, dates: impl IntoIterator<Item = NaiveDate>) -> DayLocks {
        let dates: BTreeSet<NaiveDate> = dates.into_iter().collect();
        let mut guards = BTreeMap::new();
        for date in dates {
            let day = self.store.day_or_create(date);
            guards.insert(date, day.write_owned().await);
        }
        DayLocks { guards }
    }

    /// Lookup shift -> day, acquire that day's write lock.
    /// Retries if the shift moved to another day while we waited.
    pub(super) async fn resolve_shift_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DayState>, EngineError> {
        for _ in 0..4 {
            let date = self.store.shift_date(&id).ok_or(EngineError::NotFound(id))?;
            let guard = self.store.day_or_create(date).write_owned().await;
            if guard.shift(id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(id))
    }

    pub(super) async fn resolve_event_write(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<DayState>, EngineError> {
        for _ in 0..4 {
            let date = self.store.event_date(&id).ok_or(EngineError::NotFound(id))?;
            let guard = self.store.day_or_create(date).write_owned().await;
            if guard.event(id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(id))
    }

    /// Rewrite the journal with only the entries needed to recreate current state.
    pub async fn compact_journal(&self) -> Result<(), EngineError> {
        let mut entries = Vec::new();
        for date in self.store.dates() {
            let Some(day) = self.store.day(&date) else { continue };
            let guard = day.read().await;
            entries.extend(guard.shifts.iter().cloned().map(JournalEntry::ShiftSaved));
            entries.extend(guard.events.iter().cloned().map(JournalEntry::EventSaved));
        }
        let mut handoffs: Vec<Handoff> = self.handoffs.iter().map(|e| e.value().clone()).collect();
        handoffs.sort_by_key(|h| h.id);
        entries.extend(handoffs.into_iter().map(JournalEntry::HandoffSaved));

        let count = entries.len();
        self.journal.compact(entries).await?;
        tracing::debug!(entries = count, "compacted journal");
        Ok(())
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }
}
