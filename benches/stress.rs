use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use carecoord::circle::CircleManager;
use carecoord::config::EngineConfig;
use carecoord::engine::{Engine, EngineError};
use carecoord::model::{Actor, ConflictPolicy, GapQuery, Shift, ShiftDraft};
use carecoord::time::TimeOfDay;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

fn bench_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("carecoord_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn origin() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn day(offset: u64) -> NaiveDate {
    origin().checked_add_days(Days::new(offset)).unwrap()
}

fn hour(h: u16) -> TimeOfDay {
    TimeOfDay::hm(h % 24, 0).unwrap()
}

fn coordinator() -> Actor {
    Actor::coordinator("bench")
}

/// Three open eight hour shifts per day.
async fn open_roster(engine: &Engine, days: u64) -> Vec<Shift> {
    let mut shifts = Vec::new();
    for d in 0..days {
        for start in [6, 14, 22] {
            let draft = ShiftDraft::new(day(d), hour(start), hour(start + 8));
            let saved = engine
                .create_shift(draft, &coordinator(), ConflictPolicy::Reject)
                .await
                .unwrap();
            shifts.extend(saved.shifts);
        }
    }
    shifts
}

async fn phase1_sequential(dir: &PathBuf) {
    let engine = Engine::open(&dir.join("sequential.wal"), EngineConfig::default()).unwrap();
    let n = 2000u64;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for i in 0..n {
        let draft = ShiftDraft::new(day(i / 3), hour(6 + 8 * (i % 3) as u16), hour(14 + 8 * (i % 3) as u16))
            .assigned(format!("caregiver-{}", i % 3));
        let t = Instant::now();
        engine
            .create_shift(draft, &coordinator(), ConflictPolicy::Reject)
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} shifts in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_claim_races(dir: &PathBuf) {
    let engine = Arc::new(Engine::open(&dir.join("claims.wal"), EngineConfig::default()).unwrap());
    let shifts = open_roster(&engine, 100).await;
    let n_claimants = 8;

    let wins = Arc::new(AtomicUsize::new(0));
    let losses = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for c in 0..n_claimants {
        let engine = engine.clone();
        let ids: Vec<Ulid> = shifts.iter().map(|s| s.id).collect();
        let wins = wins.clone();
        let losses = losses.clone();
        handles.push(tokio::spawn(async move {
            let who = format!("caregiver-{c}");
            let actor = Actor::caregiver(who.clone());
            for id in ids {
                match engine.claim(id, &who, &actor).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::AlreadyAssigned(_) | EngineError::Conflict(_)) => {
                        losses.fetch_add(1, Ordering::Relaxed)
                    }
                    Err(e) => panic!("unexpected claim error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let wins = wins.load(Ordering::Relaxed);
    let losses = losses.load(Ordering::Relaxed);
    println!(
        "  {n_claimants} claimants x {} shifts: {wins} won, {losses} lost in {:.2}s",
        shifts.len(),
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, shifts.len(), "every shift must have exactly one winner");
}

async fn phase3_scan_under_load() {
    let engine = Arc::new(Engine::in_memory(EngineConfig::default()));
    let shifts = open_roster(&engine, 60).await;

    // Writers claim and release in the background while readers scan.
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        let ids: Vec<Ulid> = shifts.iter().skip(w).step_by(4).map(|s| s.id).collect();
        writers.push(tokio::spawn(async move {
            let who = format!("writer-{w}");
            let actor = Actor::caregiver(who.clone());
            while !stop.load(Ordering::Relaxed) {
                for id in &ids {
                    if engine.claim(*id, &who, &actor).await.is_ok() {
                        let _ = engine.release(*id, &actor).await;
                    }
                }
            }
        }));
    }

    let query = GapQuery {
        start_date: day(0),
        end_date: day(29),
        required_window_start: hour(6),
        required_window_end: hour(22),
    };
    let mut readers = Vec::new();
    for _ in 0..8 {
        let engine = engine.clone();
        let query = query.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(100);
            for _ in 0..100 {
                let t = Instant::now();
                engine.detect_gaps(&query).await.unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("30-day gap scan", &mut all);
}

async fn phase4_circle_storm(dir: &PathBuf) {
    let circles = Arc::new(CircleManager::new(dir.join("circles"), 1000, EngineConfig::default()));
    std::fs::create_dir_all(dir.join("circles")).unwrap();
    let n_circles = 50;
    let ops_per_circle = 20u64;

    let start = Instant::now();
    let success = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for c in 0..n_circles {
        let circles = circles.clone();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let engine = circles.get_or_create(&format!("circle_{c}")).unwrap();
            for i in 0..ops_per_circle {
                let draft = ShiftDraft::new(day(i), hour(9), hour(17)).assigned("ana");
                engine
                    .create_shift(draft, &coordinator(), ConflictPolicy::Reject)
                    .await
                    .unwrap();
            }
            success.fetch_add(1, Ordering::Relaxed);
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    let ok = success.load(Ordering::Relaxed);
    println!(
        "  {n_circles} circles, {ops_per_circle} shifts each: {ok}/{n_circles} succeeded in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let dir = bench_dir();
    println!("=== carecoord stress benchmark ===");
    println!("data: {}\n", dir.display());

    println!("[phase 1] sequential shift creation (WAL)");
    phase1_sequential(&dir).await;

    println!("\n[phase 2] concurrent claim races");
    phase2_claim_races(&dir).await;

    println!("\n[phase 3] gap scans under claim/release load");
    phase3_scan_under_load().await;

    println!("\n[phase 4] circle storm");
    phase4_circle_storm(&dir).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\n=== done ===");
}
