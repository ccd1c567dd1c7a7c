use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::config::{EngineConfig, ScanSettings, Settings};
use crate::engine::Engine;
use crate::limits::*;
use crate::scanner;

/// Per-circle engines. Each care circle gets its own Engine, WAL file,
/// compactor and (when configured) gap scanner.
pub struct CircleManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
    scan: Option<ScanSettings>,
    config: EngineConfig,
}

/// Keep only characters that are safe in a file name.
fn sanitize(circle: &str) -> String {
    circle
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl CircleManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64, config: EngineConfig) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
            scan: None,
            config,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let mut manager = Self::new(
            settings.data_dir.clone(),
            settings.compact_threshold,
            settings.engine.clone(),
        );
        manager.scan = settings.scan.clone();
        manager
    }

    /// Get or lazily open the engine for `circle`.
    pub fn get_or_create(&self, circle: &str) -> io::Result<Arc<Engine>> {
        if circle.len() > MAX_CIRCLE_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "circle name too long"));
        }
        let name = sanitize(circle);
        if name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty circle name"));
        }
        if let Some(engine) = self.engines.get(&name) {
            return Ok(engine.value().clone());
        }
        // Counted before taking the entry: len() locks every shard.
        if self.engines.len() >= MAX_CIRCLES {
            return Err(io::Error::other("too many circles"));
        }

        let engine = match self.engines.entry(name.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let wal_path = self.data_dir.join(format!("{name}.wal"));
                let engine = Arc::new(Engine::open(&wal_path, self.config.clone())?);
                e.insert(engine.clone());
                engine
            }
        };

        tokio::spawn(scanner::run_compactor(engine.clone(), name.clone(), self.compact_threshold));
        if let Some(scan) = &self.scan {
            tokio::spawn(scanner::run_gap_scanner(engine.clone(), name.clone(), scan.clone()));
        }
        metrics::gauge!(crate::observability::CIRCLES_ACTIVE).set(self.engines.len() as f64);
        info!(circle = %name, "opened care circle");
        Ok(engine)
    }

    pub fn circle_count(&self) -> usize {
        self.engines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{date, tod};
    use crate::model::{Actor, ConflictPolicy, ShiftDraft};
    use std::fs;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("carecoord_test_circle").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn manager(dir: PathBuf) -> CircleManager {
        CircleManager::new(dir, 1000, EngineConfig::default())
    }

    #[tokio::test]
    async fn circles_are_isolated() {
        let cm = manager(test_data_dir("isolation"));
        let mum = cm.get_or_create("mum").unwrap();
        let dad = cm.get_or_create("dad").unwrap();

        let draft = ShiftDraft::new(date("2024-03-01"), tod("09:00"), tod("17:00")).assigned("ana");
        mum.create_shift(draft.clone(), &Actor::coordinator("c"), ConflictPolicy::Reject)
            .await
            .unwrap();

        assert_eq!(mum.shifts_on(date("2024-03-01")).await.len(), 1);
        assert!(dad.shifts_on(date("2024-03-01")).await.is_empty());
        // Same caregiver, same hours, different circle: no conflict.
        assert!(
            dad.create_shift(draft, &Actor::coordinator("c"), ConflictPolicy::Reject)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn lazy_creation() {
        let dir = test_data_dir("lazy");
        let cm = manager(dir.clone());
        assert!(fs::read_dir(&dir).unwrap().next().is_none());

        cm.get_or_create("smith_family").unwrap();
        assert!(dir.join("smith_family.wal").exists());
        assert_eq!(cm.circle_count(), 1);
    }

    #[tokio::test]
    async fn same_engine_returned() {
        let cm = manager(test_data_dir("same"));
        let a = cm.get_or_create("foo").unwrap();
        let b = cm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn names_sanitized() {
        let dir = test_data_dir("sanitize");
        let cm = manager(dir.clone());

        let evil = cm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());
        // Both spellings land on the same file, so they share one engine.
        assert!(Arc::ptr_eq(&evil, &cm.get_or_create("evil").unwrap()));

        let err = cm.get_or_create("../..").err().unwrap();
        assert!(err.to_string().contains("empty circle name"));
    }

    #[tokio::test]
    async fn name_too_long() {
        let cm = manager(test_data_dir("too_long"));
        let err = cm.get_or_create(&"x".repeat(MAX_CIRCLE_NAME_LEN + 1)).err().unwrap();
        assert!(err.to_string().contains("circle name too long"));
    }

    #[tokio::test]
    async fn reopened_circle_replays() {
        let dir = test_data_dir("reopen");
        {
            let cm = manager(dir.clone());
            let engine = cm.get_or_create("gran").unwrap();
            let draft = ShiftDraft::new(date("2024-03-01"), tod("09:00"), tod("17:00"));
            engine
                .create_shift(draft, &Actor::coordinator("c"), ConflictPolicy::Reject)
                .await
                .unwrap();
        }
        let cm = manager(dir);
        let engine = cm.get_or_create("gran").unwrap();
        assert_eq!(engine.shifts_on(date("2024-03-01")).await.len(), 1);
    }
}
