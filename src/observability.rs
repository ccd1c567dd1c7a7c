use std::net::SocketAddr;

use crate::command::Command;
use crate::model::Priority;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "carecoord_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "carecoord_command_duration_seconds";

/// Counter: request lines that could not be parsed.
pub const MALFORMED_REQUESTS_TOTAL: &str = "carecoord_malformed_requests_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: number of open care circles (loaded engines).
pub const CIRCLES_ACTIVE: &str = "carecoord_circles_active";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "carecoord_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (entries per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "carecoord_journal_flush_batch_size";

/// Counter: journal compactions.
pub const JOURNAL_COMPACTIONS_TOTAL: &str = "carecoord_journal_compactions_total";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: gaps found by background scans. Labels: priority.
pub const GAPS_DETECTED_TOTAL: &str = "carecoord_gaps_detected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

pub fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Low => "low",
        Priority::Medium => "medium",
        Priority::High => "high",
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateShift { .. } => "create_shift",
        Command::UpdateShift { .. } => "update_shift",
        Command::DeleteShift { .. } => "delete_shift",
        Command::GetShift { .. } => "get_shift",
        Command::ShiftsOn { .. } => "shifts_on",
        Command::ShiftsFor { .. } => "shifts_for",
        Command::Upcoming { .. } => "upcoming",
        Command::Mine { .. } => "mine",
        Command::Claim { .. } => "claim",
        Command::Release { .. } => "release",
        Command::StartShift { .. } => "start_shift",
        Command::CompleteShift { .. } => "complete_shift",
        Command::AttachTasks { .. } => "attach_tasks",
        Command::DetachTask { .. } => "detach_task",
        Command::FindConflicts { .. } => "find_conflicts",
        Command::CreateEvent { .. } => "create_event",
        Command::UpdateEvent { .. } => "update_event",
        Command::DeleteEvent { .. } => "delete_event",
        Command::GetEvent { .. } => "get_event",
        Command::EventsOn { .. } => "events_on",
        Command::DetectGaps { .. } => "detect_gaps",
        Command::OpenGaps => "open_gaps",
        Command::GetGap { .. } => "get_gap",
        Command::ApplyResolution { .. } => "apply_resolution",
        Command::CreateHandoff { .. } => "create_handoff",
        Command::AcknowledgeHandoff { .. } => "acknowledge_handoff",
        Command::CompleteHandoff { .. } => "complete_handoff",
        Command::GetHandoff { .. } => "get_handoff",
        Command::HandoffForShift { .. } => "handoff_for_shift",
        Command::PendingHandoffs { .. } => "pending_handoffs",
    }
}
