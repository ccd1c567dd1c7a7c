use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, WriteHalf};
use tokio_test::assert_ok;
use ulid::Ulid;

use carecoord::circle::CircleManager;
use carecoord::config::EngineConfig;
use carecoord::limits::MAX_LINE_LEN;
use carecoord::wire;

// ── Test infrastructure ──────────────────────────────────────

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("carecoord_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

struct Client {
    writer: WriteHalf<DuplexStream>,
    lines: Lines<BufReader<tokio::io::ReadHalf<DuplexStream>>>,
}

impl Client {
    async fn send_raw(&mut self, line: &str) -> Value {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        let reply = self.lines.next_line().await.unwrap().expect("server closed");
        serde_json::from_str(&reply).unwrap()
    }

    async fn send(&mut self, request: Value) -> Value {
        self.send_raw(&request.to_string()).await
    }

    /// Send and unwrap the `ok` payload.
    async fn ok(&mut self, request: Value) -> Value {
        let reply = self.send(request.clone()).await;
        match reply.get("ok") {
            Some(v) => v.clone(),
            None => panic!("request {request} failed: {reply}"),
        }
    }

    /// Send and return the error kind.
    async fn err(&mut self, request: Value) -> String {
        let reply = self.send(request.clone()).await;
        match reply["error"]["kind"].as_str() {
            Some(kind) => kind.to_string(),
            None => panic!("request {request} unexpectedly succeeded: {reply}"),
        }
    }
}

fn start_server(circles: Arc<CircleManager>) -> Client {
    let (client, server) = tokio::io::duplex(MAX_LINE_LEN * 2);
    let (server_read, server_write) = tokio::io::split(server);
    tokio::spawn(async move {
        let _ = wire::process_stream(server_read, server_write, circles).await;
    });
    let (client_read, client_write) = tokio::io::split(client);
    Client {
        writer: client_write,
        lines: BufReader::new(client_read).lines(),
    }
}

fn start() -> Client {
    start_server(Arc::new(CircleManager::new(test_dir(), 1000, EngineConfig::default())))
}

fn coordinator() -> Value {
    json!({"id": "coord", "role": "coordinator"})
}

fn caregiver(id: &str) -> Value {
    json!({"id": id, "role": "caregiver"})
}

fn shift(date: &str, start: &str, end: &str, who: Option<&str>) -> Value {
    let mut s = json!({"date": date, "startTime": start, "endTime": end});
    if let Some(who) = who {
        s["assignedTo"] = json!(who);
    }
    s
}

async fn create(client: &mut Client, circle: &str, s: Value) -> String {
    let saved = client
        .ok(json!({"circle": circle, "op": "create_shift", "actor": coordinator(), "shift": s}))
        .await;
    saved["shifts"][0]["id"].as_str().unwrap().to_string()
}

// ── Shift lifecycle ──────────────────────────────────────────

#[tokio::test]
async fn shift_lifecycle_without_successor() {
    let mut c = start();
    let id = create(&mut c, "mum", shift("2024-03-01", "09:00", "17:00", None)).await;

    assert_eq!(
        c.err(json!({"circle": "mum", "op": "claim", "actor": caregiver("ben"), "id": id, "assignee": "ana"}))
            .await,
        "not_permitted"
    );
    let claimed = c
        .ok(json!({"circle": "mum", "op": "claim", "actor": caregiver("ana"), "id": id, "assignee": "ana"}))
        .await;
    assert_eq!(claimed["status"], "scheduled");
    assert_eq!(claimed["assignedTo"], "ana");

    assert_eq!(
        c.err(json!({"circle": "mum", "op": "claim", "actor": coordinator(), "id": id, "assignee": "ben"}))
            .await,
        "already_assigned"
    );

    let started = c.ok(json!({"circle": "mum", "op": "start_shift", "id": id})).await;
    assert_eq!(started["status"], "in_progress");

    let done = c
        .ok(json!({"circle": "mum", "op": "complete_shift", "id": id, "notes": "all quiet"}))
        .await;
    assert_eq!(done["shift"]["status"], "completed");
    assert_eq!(done["shift"]["handoffNotes"], "all quiet");
    assert_eq!(done["handoff"]["outcome"], "no_successor_found");
    assert_eq!(done["handoff"]["shiftId"], json!(id));
}

#[tokio::test]
async fn overlapping_shift_is_a_conflict() {
    let mut c = start();
    let first = create(&mut c, "mum", shift("2024-03-01", "09:00", "17:00", Some("ana"))).await;

    let reply = c
        .send(json!({"circle": "mum", "op": "create_shift", "actor": coordinator(),
                     "shift": shift("2024-03-01", "16:00", "18:00", Some("ana"))}))
        .await;
    assert_eq!(reply["error"]["kind"], "conflict");
    assert!(reply["error"]["message"].as_str().unwrap().contains(&first));

    let warned = c
        .ok(json!({"circle": "mum", "op": "create_shift", "actor": coordinator(), "policy": "warn",
                   "shift": shift("2024-03-01", "16:00", "18:00", Some("ana"))}))
        .await;
    assert_eq!(warned["conflicts"][0]["id"], json!(first));
    assert_eq!(warned["conflicts"][0]["kind"], "shift");

    let day = c.ok(json!({"circle": "mum", "op": "shifts_on", "date": "2024-03-01"})).await;
    assert_eq!(day.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn recurring_draft_over_json() {
    let mut c = start();
    let mut s = shift("2024-03-04", "09:00", "12:00", Some("ana"));
    s["recurring"] = json!(true);
    s["recurrencePattern"] = json!({
        "frequency": "weekly",
        "weekdays": ["Mon", "Wed", "Fri"],
        "end": {"on_date": "2024-03-17"}
    });
    let saved = c
        .ok(json!({"circle": "mum", "op": "create_shift", "actor": coordinator(), "shift": s}))
        .await;
    let shifts = saved["shifts"].as_array().unwrap();
    assert_eq!(shifts.len(), 6);
    assert_eq!(shifts[5]["date"], "2024-03-15");

    let mine = c
        .ok(json!({"circle": "mum", "op": "mine", "assignee": "ana", "now": "2024-03-10T00:00:00", "limit": 10}))
        .await;
    assert_eq!(mine.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn events_carry_computed_conflict_flag() {
    let mut c = start();
    create(&mut c, "mum", shift("2024-03-01", "09:00", "17:00", Some("ana"))).await;
    let views = c
        .ok(json!({"circle": "mum", "op": "create_event", "actor": coordinator(),
                   "event": {"title": "insulin", "date": "2024-03-01", "startTime": "12:00",
                             "endTime": "12:15", "assignedTo": "ana", "category": "medication",
                             "priority": "high"}}))
        .await;
    assert_eq!(views[0]["hasConflict"], true);
    assert_eq!(views[0]["title"], "insulin");
    let id = views[0]["id"].clone();

    let unassigned = c
        .ok(json!({"circle": "mum", "op": "update_event", "actor": coordinator(), "id": id,
                   "patch": {"assignedTo": null}}))
        .await;
    assert_eq!(unassigned["assignedTo"], Value::Null);
    assert_eq!(unassigned["hasConflict"], false);
}

// ── Coverage ─────────────────────────────────────────────────

#[tokio::test]
async fn afternoon_gap_resolved_by_reschedule() {
    let mut c = start();
    create(&mut c, "dad", shift("2024-03-02", "06:00", "13:00", Some("ana"))).await;
    create(&mut c, "dad", shift("2024-03-02", "15:00", "22:00", Some("ben"))).await;
    create(&mut c, "dad", shift("2024-03-02", "16:00", "18:00", None)).await;

    let query = json!({"startDate": "2024-03-02", "endDate": "2024-03-02",
                       "requiredWindowStart": "06:00", "requiredWindowEnd": "22:00"});
    let gaps = c.ok(json!({"circle": "dad", "op": "detect_gaps", "query": query})).await;
    let gaps = gaps.as_array().unwrap();
    assert_eq!(gaps.len(), 1);
    let gap = &gaps[0];
    assert_eq!((gap["startTime"].as_str(), gap["endTime"].as_str()), (Some("13:00"), Some("15:00")));
    assert_eq!(gap["priority"], "high");

    let option = gap["options"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["type"] == "reschedule")
        .expect("reschedule option")
        .clone();
    let outcome = c
        .ok(json!({"circle": "dad", "op": "apply_resolution", "actor": coordinator(),
                   "choice": {"gapId": gap["id"], "resolutionId": option["id"]}}))
        .await;
    assert_eq!(outcome["gap"]["status"], "addressed");
    assert_eq!(outcome["createdShiftIds"].as_array().unwrap().len(), 1);

    let again = c.ok(json!({"circle": "dad", "op": "detect_gaps", "query": query})).await;
    assert!(again.as_array().unwrap().is_empty());
    let open = c.ok(json!({"circle": "dad", "op": "open_gaps"})).await;
    assert!(open.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn custom_resolution_over_json() {
    let mut c = start();
    let query = json!({"startDate": "2024-03-01", "endDate": "2024-03-01",
                       "requiredWindowStart": "06:00", "requiredWindowEnd": "22:00"});
    let gaps = c.ok(json!({"circle": "gran", "op": "detect_gaps", "query": query})).await;
    let gap_id = gaps[0]["id"].clone();

    let outcome = c
        .ok(json!({"circle": "gran", "op": "apply_resolution", "actor": coordinator(),
                   "choice": {"gapId": gap_id, "custom": {"date": "2024-03-01",
                              "startTime": "06:00", "endTime": "22:00", "assignedTo": "cy"}}}))
        .await;
    let created = outcome["createdShiftIds"][0].clone();
    let s = c.ok(json!({"circle": "gran", "op": "get_shift", "id": created})).await;
    assert_eq!(s["assignedTo"], "cy");

    assert_eq!(
        c.err(json!({"circle": "gran", "op": "apply_resolution", "actor": coordinator(),
                     "choice": {"gapId": gap_id, "custom": {"date": "2024-03-01",
                                "startTime": "06:00", "endTime": "22:00"}}}))
            .await,
        "resolution_failed"
    );
}

// ── Handoffs ─────────────────────────────────────────────────

#[tokio::test]
async fn handoff_between_consecutive_shifts() {
    let mut c = start();
    let day = create(&mut c, "mum", shift("2024-03-01", "06:00", "14:00", Some("ana"))).await;
    let evening = create(&mut c, "mum", shift("2024-03-01", "14:00", "22:00", Some("ben"))).await;
    let (meds, walk) = (Ulid::new().to_string(), Ulid::new().to_string());
    c.ok(json!({"circle": "mum", "op": "attach_tasks", "id": day, "taskIds": [meds, walk]}))
        .await;
    c.ok(json!({"circle": "mum", "op": "start_shift", "id": day})).await;

    let done = c
        .ok(json!({"circle": "mum", "op": "complete_shift", "id": day,
                   "notes": "walk postponed", "completedTaskIds": [meds]}))
        .await;
    let handoff = &done["handoff"];
    assert_eq!(handoff["outcome"], "created");
    assert_eq!(handoff["destinationShiftId"], json!(evening));
    assert_eq!(handoff["pendingTaskIds"], json!([walk]));
    assert_eq!(handoff["status"], "pending");
    let id = handoff["id"].clone();

    let pending = c.ok(json!({"circle": "mum", "op": "pending_handoffs", "assignee": "ben"})).await;
    assert_eq!(pending[0]["id"], id);

    assert_eq!(
        c.err(json!({"circle": "mum", "op": "acknowledge_handoff", "actor": {"id": "ana"}, "id": id}))
            .await,
        "not_permitted"
    );
    let acked = c
        .ok(json!({"circle": "mum", "op": "acknowledge_handoff", "actor": {"id": "ben"}, "id": id}))
        .await;
    assert_eq!(acked["status"], "acknowledged");
    let completed = c
        .ok(json!({"circle": "mum", "op": "complete_handoff", "actor": {"id": "ben"}, "id": id}))
        .await;
    assert_eq!(completed["status"], "completed");

    let by_shift = c.ok(json!({"circle": "mum", "op": "handoff_for_shift", "shiftId": day})).await;
    assert_eq!(by_shift["id"], id);
}

// ── Protocol edges ───────────────────────────────────────────

#[tokio::test]
async fn malformed_lines_do_not_end_the_session() {
    let mut c = start();
    let reply = c.send_raw("{not json").await;
    assert_eq!(reply["error"]["kind"], "parse_error");
    let reply = c.send(json!({"circle": "mum", "op": "teleport"})).await;
    assert_eq!(reply["error"]["kind"], "parse_error");
    let reply = c.send(json!({"circle": "../..", "op": "open_gaps"})).await;
    assert_eq!(reply["error"]["kind"], "circle_error");

    let ok = c.ok(json!({"circle": "mum", "op": "open_gaps"})).await;
    assert_eq!(ok, json!([]));
}

#[tokio::test]
async fn oversized_line_rejected() {
    let mut c = start();
    let huge = format!(r#"{{"circle":"mum","op":"open_gaps","pad":"{}"}}"#, "x".repeat(MAX_LINE_LEN));
    let reply = c.send_raw(&huge).await;
    assert_eq!(reply["error"]["kind"], "line_too_long");
    assert_ok!(
        serde_json::from_value::<Vec<Value>>(c.ok(json!({"circle": "mum", "op": "open_gaps"})).await)
    );
}

#[tokio::test]
async fn not_found_is_reported() {
    let mut c = start();
    let id = Ulid::new().to_string();
    assert_eq!(c.err(json!({"circle": "mum", "op": "get_shift", "id": id})).await, "not_found");
    assert_eq!(c.err(json!({"circle": "mum", "op": "get_handoff", "id": id})).await, "not_found");
    let none = c.ok(json!({"circle": "mum", "op": "handoff_for_shift", "shiftId": id})).await;
    assert_eq!(none, Value::Null);
}

#[tokio::test]
async fn circles_survive_restart() {
    let dir = test_dir();
    let id = {
        let mut c = start_server(Arc::new(CircleManager::new(dir.clone(), 1000, EngineConfig::default())));
        create(&mut c, "mum", shift("2024-03-01", "09:00", "17:00", Some("ana"))).await
    };
    let mut c = start_server(Arc::new(CircleManager::new(dir, 1000, EngineConfig::default())));
    let s = c.ok(json!({"circle": "mum", "op": "get_shift", "id": id})).await;
    assert_eq!(s["assignedTo"], "ana");
    let other = c.ok(json!({"circle": "dad", "op": "shifts_on", "date": "2024-03-01"})).await;
    assert_eq!(other, json!([]));
}
