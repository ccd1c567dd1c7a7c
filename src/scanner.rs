use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Local, NaiveDate};
use tracing::{debug, info, warn};

use crate::config::ScanSettings;
use crate::engine::Engine;
use crate::model::{GapQuery, Priority};

/// How often the compactor checks the journal.
const COMPACT_CHECK_INTERVAL: Duration = Duration::from_secs(30);

fn scan_query(today: NaiveDate, settings: &ScanSettings) -> GapQuery {
    GapQuery {
        start_date: today,
        end_date: today
            .checked_add_days(Days::new(settings.horizon_days))
            .unwrap_or(today),
        required_window_start: settings.required_window.start,
        required_window_end: settings.required_window.end,
    }
}

/// One scan of `[today, today + horizon]`. Gaps from earlier days are
/// forgotten first. Returns how many high-priority gaps were found.
pub async fn scan_once(engine: &Engine, circle: &str, today: NaiveDate, settings: &ScanSettings) -> usize {
    let pruned = engine.prune_gaps_before(today);
    if pruned > 0 {
        debug!(circle, pruned, "dropped gaps from past days");
    }
    let query = scan_query(today, settings);
    let gaps = match engine.detect_gaps(&query).await {
        Ok(gaps) => gaps,
        Err(e) => {
            warn!(circle, error = %e, "gap scan failed");
            return 0;
        }
    };

    let mut high = 0;
    for gap in &gaps {
        metrics::counter!(
            crate::observability::GAPS_DETECTED_TOTAL,
            "priority" => crate::observability::priority_label(gap.priority)
        )
        .increment(1);
        if gap.priority == Priority::High {
            high += 1;
            warn!(
                circle,
                gap = %gap.id,
                date = %gap.date,
                start = %gap.start_time,
                end = %gap.end_time,
                status = ?gap.status,
                "uncovered care window"
            );
        }
    }
    debug!(circle, gaps = gaps.len(), high, "scheduled gap scan");
    high
}

/// Background task that re-scans a circle's upcoming days for coverage gaps.
pub async fn run_gap_scanner(engine: Arc<Engine>, circle: String, settings: ScanSettings) {
    let mut interval = tokio::time::interval(settings.interval);
    info!(circle, every = ?settings.interval, horizon = settings.horizon_days, "gap scanner started");
    loop {
        interval.tick().await;
        let today = Local::now().date_naive();
        scan_once(&engine, &circle, today, &settings).await;
    }
}

/// Background task that compacts the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, circle: String, threshold: u64) {
    let mut interval = tokio::time::interval(COMPACT_CHECK_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::JOURNAL_COMPACTIONS_TOTAL).increment(1);
                info!(circle, appends, "journal compacted");
            }
            Err(e) => warn!(circle, error = %e, "journal compaction failed"),
        }
    }
}
