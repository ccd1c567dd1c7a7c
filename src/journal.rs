use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::EngineError;
use crate::model::JournalEntry;

/// Durable record of committed changes. The engine appends one entry per
/// applied change and never reads back; replay happens before construction.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn append(&self, entry: &JournalEntry) -> Result<(), EngineError>;

    /// Replace history with a snapshot that recreates current state.
    async fn compact(&self, _snapshot: Vec<JournalEntry>) -> Result<(), EngineError> {
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        0
    }
}

/// Keeps nothing. For purely in-memory engines.
pub struct NullJournal;

#[async_trait]
impl Journal for NullJournal {
    async fn append(&self, _entry: &JournalEntry) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Keeps entries in memory, for inspecting what an engine committed.
#[derive(Default)]
pub struct MemoryJournal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<JournalEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn append(&self, entry: &JournalEntry) -> Result<(), EngineError> {
        self.entries.lock().await.push(entry.clone());
        Ok(())
    }

    async fn compact(&self, snapshot: Vec<JournalEntry>) -> Result<(), EngineError> {
        *self.entries.lock().await = snapshot;
        Ok(())
    }

    async fn appends_since_compact(&self) -> u64 {
        self.entries.lock().await.len() as u64
    }
}
