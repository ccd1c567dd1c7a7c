use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::model::Minute;
use crate::time::{TimeOfDay, Window};

/// Tunable policy for one engine. Every threshold is a default, not a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Gaps at least this long are high priority.
    pub gap_threshold_minutes: Minute,
    /// Gaps shorter than this are low priority. `None` disables the low tier.
    pub minor_gap_minutes: Option<Minute>,
    /// Gaps touching this window are high priority and critical.
    pub critical_window: Option<Window>,
    /// How close an adjoining shift must end/start to suggest its caregiver.
    pub proximity_minutes: Minute,
    /// How close a backup-type shift must be to suggest its caregiver.
    pub backup_proximity_minutes: Minute,
    /// How far ahead a recurring draft with no end is expanded.
    pub recurrence_horizon_days: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gap_threshold_minutes: 120,
            minor_gap_minutes: None,
            critical_window: None,
            proximity_minutes: 60,
            backup_proximity_minutes: 240,
            recurrence_horizon_days: 90,
        }
    }
}

/// Background gap scanning for every care circle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSettings {
    pub interval: Duration,
    pub horizon_days: u64,
    pub required_window: Window,
}

/// Process-level settings, read from `CARECOORD_*` environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub scan: Option<ScanSettings>,
    pub engine: EngineConfig,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            gap_threshold_minutes: parsed(&lookup, "CARECOORD_GAP_THRESHOLD_MINUTES")
                .unwrap_or(defaults.gap_threshold_minutes),
            minor_gap_minutes: parsed(&lookup, "CARECOORD_MINOR_GAP_MINUTES"),
            critical_window: parsed(&lookup, "CARECOORD_CRITICAL_WINDOW"),
            proximity_minutes: parsed(&lookup, "CARECOORD_PROXIMITY_MINUTES")
                .unwrap_or(defaults.proximity_minutes),
            backup_proximity_minutes: parsed(&lookup, "CARECOORD_BACKUP_PROXIMITY_MINUTES")
                .unwrap_or(defaults.backup_proximity_minutes),
            recurrence_horizon_days: parsed(&lookup, "CARECOORD_RECURRENCE_HORIZON_DAYS")
                .unwrap_or(defaults.recurrence_horizon_days),
        };

        let scan_secs: u64 = parsed(&lookup, "CARECOORD_SCAN_INTERVAL_SECS").unwrap_or(0);
        let scan = (scan_secs > 0).then(|| ScanSettings {
            interval: Duration::from_secs(scan_secs),
            horizon_days: parsed(&lookup, "CARECOORD_SCAN_HORIZON_DAYS").unwrap_or(7),
            required_window: parsed(&lookup, "CARECOORD_REQUIRED_WINDOW")
                .unwrap_or_else(default_required_window),
        });

        Self {
            data_dir: lookup("CARECOORD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: parsed(&lookup, "CARECOORD_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "CARECOORD_COMPACT_THRESHOLD").unwrap_or(1000),
            scan,
            engine,
        }
    }
}

fn default_required_window() -> Window {
    Window::new(
        TimeOfDay::hm(6, 0).unwrap_or(TimeOfDay::MIDNIGHT),
        TimeOfDay::hm(22, 0).unwrap_or(TimeOfDay::MIDNIGHT),
    )
}
