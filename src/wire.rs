use std::io;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::circle::CircleManager;
use crate::command::{self, Command, CommandError, Response};
use crate::engine::Engine;
use crate::limits::MAX_LINE_LEN;
use crate::model::CompletionReport;

/// Page size for listing commands that do not name one.
const DEFAULT_LIMIT: usize = 50;

fn to_json<T: Serialize>(value: &T) -> Result<Value, CommandError> {
    serde_json::to_value(value).map_err(|e| CommandError::Internal(e.to_string()))
}

/// Run one command against a circle's engine.
pub async fn execute_command(engine: &Engine, cmd: Command) -> Result<Value, CommandError> {
    match cmd {
        Command::CreateShift { actor, shift, policy } => {
            to_json(&engine.create_shift(shift, &actor, policy).await?)
        }
        Command::UpdateShift { actor, id, patch, policy } => {
            to_json(&engine.update_shift(id, patch, &actor, policy).await?)
        }
        Command::DeleteShift { actor, id } => to_json(&engine.delete_shift(id, &actor).await?),
        Command::GetShift { id } => to_json(&engine.get_shift(id).await?),
        Command::ShiftsOn { date } => to_json(&engine.shifts_on(date).await),
        Command::ShiftsFor { assignee } => to_json(&engine.shifts_for(&assignee).await),
        Command::Upcoming { now, limit } => {
            let now = now.unwrap_or_else(|| Local::now().naive_local());
            to_json(&engine.upcoming(now, limit.unwrap_or(DEFAULT_LIMIT)).await)
        }
        Command::Mine { assignee, now, limit } => {
            let now = now.unwrap_or_else(|| Local::now().naive_local());
            to_json(&engine.mine(&assignee, now, limit.unwrap_or(DEFAULT_LIMIT)).await)
        }
        Command::Claim { actor, id, assignee } => to_json(&engine.claim(id, &assignee, &actor).await?),
        Command::Release { actor, id } => to_json(&engine.release(id, &actor).await?),
        Command::StartShift { id } => to_json(&engine.start(id).await?),
        Command::CompleteShift { id, notes, completed_task_ids } => {
            let report = CompletionReport { notes, completed_task_ids };
            to_json(&engine.complete(id, report).await?)
        }
        Command::AttachTasks { id, task_ids } => to_json(&engine.attach_tasks(id, task_ids).await?),
        Command::DetachTask { id, task_id } => to_json(&engine.detach_task(id, task_id).await?),
        Command::FindConflicts { candidate, exclude } => {
            to_json(&engine.find_conflicts(&candidate, exclude).await?)
        }

        Command::CreateEvent { actor, event } => to_json(&engine.create_event(event, &actor).await?),
        Command::UpdateEvent { actor, id, patch } => {
            to_json(&engine.update_event(id, patch, &actor).await?)
        }
        Command::DeleteEvent { actor, id } => to_json(&engine.delete_event(id, &actor).await?),
        Command::GetEvent { id } => to_json(&engine.get_event(id).await?),
        Command::EventsOn { date } => to_json(&engine.events_on(date).await),

        Command::DetectGaps { query } => to_json(&engine.detect_gaps(&query).await?),
        Command::OpenGaps => to_json(&engine.open_gaps()),
        Command::GetGap { id } => to_json(&engine.gap(id)?),
        Command::ApplyResolution { actor, choice } => {
            to_json(&engine.apply_resolution(choice, &actor).await?)
        }

        Command::CreateHandoff { request } => to_json(&engine.create_handoff(request).await?),
        Command::AcknowledgeHandoff { actor, id } => {
            to_json(&engine.acknowledge_handoff(id, &actor).await?)
        }
        Command::CompleteHandoff { actor, id } => to_json(&engine.complete_handoff(id, &actor).await?),
        Command::GetHandoff { id } => to_json(&engine.get_handoff(id)?),
        Command::HandoffForShift { shift_id } => to_json(&engine.handoff_for_shift(shift_id)),
        Command::PendingHandoffs { assignee } => to_json(&engine.pending_handoffs_for(&assignee)),
    }
}

/// Parse, route and execute one request line.
pub async fn handle_line(circles: &CircleManager, line: &str) -> Response {
    let request = match command::parse(line) {
        Ok(request) => request,
        Err(e) => {
            metrics::counter!(crate::observability::MALFORMED_REQUESTS_TOTAL).increment(1);
            debug!(error = %e, "malformed request");
            return Response::from_result(Err(e));
        }
    };
    let engine = match circles.get_or_create(&request.circle) {
        Ok(engine) => engine,
        Err(e) => {
            warn!(circle = %request.circle, error = %e, "circle unavailable");
            return Response::from_result(Err(CommandError::Circle(e.to_string())));
        }
    };

    let label = crate::observability::command_label(&request.command);
    let start = Instant::now();
    let result = execute_command(&engine, request.command).await;
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        debug!(circle = %request.circle, command = label, error = %e, "command failed");
    }
    Response::from_result(result)
}

fn codec_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::other(other),
    }
}

/// Serve line-delimited JSON requests from `reader`, one response line per request.
/// Returns when the reader is exhausted.
pub async fn process_stream<R, W>(reader: R, writer: W, circles: Arc<CircleManager>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut out = FramedWrite::new(writer, LinesCodec::new());

    let mut after_error = false;
    loop {
        let next = match lines.next().await {
            Some(next) => next,
            // A decode error pauses the stream for one poll; the next poll resumes it.
            None if after_error => {
                after_error = false;
                continue;
            }
            None => break,
        };
        after_error = false;
        let response = match next {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&circles, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                after_error = true;
                metrics::counter!(crate::observability::MALFORMED_REQUESTS_TOTAL).increment(1);
                Response::from_result(Err(CommandError::LineTooLong))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        let encoded = serde_json::to_string(&response).map_err(io::Error::other)?;
        out.send(encoded).await.map_err(codec_io)?;
    }
    Ok(())
}
