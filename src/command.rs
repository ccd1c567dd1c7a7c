use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::*;

/// One request line: `{"circle": "...", "op": "...", ...}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub circle: String,
    #[serde(flatten)]
    pub command: Command,
}

/// Every operation the front end accepts. Field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    // Shifts
    CreateShift {
        actor: Actor,
        shift: ShiftDraft,
        #[serde(default)]
        policy: ConflictPolicy,
    },
    UpdateShift {
        actor: Actor,
        id: Ulid,
        patch: ShiftPatch,
        #[serde(default)]
        policy: ConflictPolicy,
    },
    DeleteShift {
        actor: Actor,
        id: Ulid,
    },
    GetShift {
        id: Ulid,
    },
    ShiftsOn {
        date: NaiveDate,
    },
    ShiftsFor {
        assignee: String,
    },
    Upcoming {
        #[serde(default)]
        now: Option<NaiveDateTime>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Mine {
        assignee: String,
        #[serde(default)]
        now: Option<NaiveDateTime>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Claim {
        actor: Actor,
        id: Ulid,
        assignee: String,
    },
    Release {
        actor: Actor,
        id: Ulid,
    },
    StartShift {
        id: Ulid,
    },
    CompleteShift {
        id: Ulid,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        completed_task_ids: Vec<Ulid>,
    },
    AttachTasks {
        id: Ulid,
        task_ids: Vec<Ulid>,
    },
    DetachTask {
        id: Ulid,
        task_id: Ulid,
    },
    FindConflicts {
        candidate: Candidate,
        #[serde(default)]
        exclude: Option<Ulid>,
    },

    // Care events
    CreateEvent {
        actor: Actor,
        event: EventDraft,
    },
    UpdateEvent {
        actor: Actor,
        id: Ulid,
        patch: EventPatch,
    },
    DeleteEvent {
        actor: Actor,
        id: Ulid,
    },
    GetEvent {
        id: Ulid,
    },
    EventsOn {
        date: NaiveDate,
    },

    // Coverage
    DetectGaps {
        query: GapQuery,
    },
    OpenGaps,
    GetGap {
        id: Ulid,
    },
    ApplyResolution {
        actor: Actor,
        choice: ResolutionChoice,
    },

    // Handoffs
    CreateHandoff {
        request: HandoffRequest,
    },
    AcknowledgeHandoff {
        actor: Actor,
        id: Ulid,
    },
    CompleteHandoff {
        actor: Actor,
        id: Ulid,
    },
    GetHandoff {
        id: Ulid,
    },
    HandoffForShift {
        shift_id: Ulid,
    },
    PendingHandoffs {
        assignee: String,
    },
}

/// Errors surfaced to a front-end client.
#[derive(Debug)]
pub enum CommandError {
    Parse(String),
    LineTooLong,
    Circle(String),
    Engine(EngineError),
    Internal(String),
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandError::Parse(_) => "parse_error",
            CommandError::LineTooLong => "line_too_long",
            CommandError::Circle(_) => "circle_error",
            CommandError::Engine(e) => e.kind(),
            CommandError::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Parse(msg) => write!(f, "malformed request: {msg}"),
            CommandError::LineTooLong => write!(f, "request line too long"),
            CommandError::Circle(msg) => write!(f, "circle error: {msg}"),
            CommandError::Engine(e) => write!(f, "{e}"),
            CommandError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        CommandError::Engine(e)
    }
}

/// What goes back on the wire for one request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(serde_json::Value),
    Error { kind: &'static str, message: String },
}

impl Response {
    pub fn from_result(result: Result<serde_json::Value, CommandError>) -> Self {
        match result {
            Ok(value) => Response::Ok(value),
            Err(e) => Response::Error {
                kind: e.kind(),
                message: e.to_string(),
            },
        }
    }
}

pub fn parse(line: &str) -> Result<Request, CommandError> {
    serde_json::from_str(line).map_err(|e| CommandError::Parse(e.to_string()))
}
