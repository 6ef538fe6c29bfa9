use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use spotbook::engine::Engine;
use spotbook::model::{Category, Window};

const HOUR: i64 = 3_600_000; // 1 hour in ms
/// 2096-10-02, far enough ahead to stay valid for the whole run.
const BASE: i64 = 4_000_000_000_000;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Fresh engine with one lot of `spots` STANDARD spots.
async fn open(dir: &Path, spots: u32) -> Arc<Engine> {
    let engine = Engine::new(dir.join(format!("bench_{}.wal", Ulid::new()))).unwrap();
    engine.create_lot("Bench", spots).await.unwrap();
    engine
        .create_spots("Bench", Category::Standard, spots)
        .await
        .unwrap();
    Arc::new(engine)
}

async fn phase1_sequential(dir: &Path) {
    let engine = open(dir, 10).await;
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let s = BASE + (i as i64) * HOUR;
        let t = Instant::now();
        engine
            .allocate("Bench", Category::Standard, Window::new(s, s + HOUR / 2))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Many tasks race for the same windows on a small lot. Every window can be
/// booked at most once per spot.
async fn phase2_contention(dir: &Path) {
    let spots = 5;
    let engine = open(dir, spots).await;
    let n_tasks = 20;
    let n_windows = 100;
    let booked = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let booked = booked.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            for j in 0..n_windows {
                let s = BASE + (j as i64) * HOUR;
                match engine
                    .allocate("Bench", Category::Standard, Window::new(s, s + HOUR / 2))
                    .await
                {
                    Ok(_) => booked.fetch_add(1, Ordering::Relaxed),
                    Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let ok = booked.load(Ordering::Relaxed);
    let total = n_tasks * n_windows;
    println!(
        "  {n_tasks} tasks x {n_windows} windows = {total} attempts in {:.2}s: {ok} booked, {} rejected",
        elapsed.as_secs_f64(),
        rejected.load(Ordering::Relaxed)
    );
    assert_eq!(ok, spots as usize * n_windows, "double booking detected");
}

async fn phase3_read_under_load(dir: &Path) {
    let engine = open(dir, 50).await;
    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for j in 0..5000 {
                let s = BASE + (j as i64 % 500) * HOUR;
                let _ = engine
                    .allocate("Bench", Category::Standard, Window::new(s, s + HOUR / 2))
                    .await;
            }
        })
    };

    let mut latencies = Vec::with_capacity(1000);
    for j in 0..1000 {
        let s = BASE + (j as i64 % 500) * HOUR;
        let t = Instant::now();
        engine
            .list_available_by_category(Category::Standard, Window::new(s, s + HOUR))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }
    writer.await.unwrap();
    print_latency("availability latency", &mut latencies);
}

async fn phase4_sweep(dir: &Path) {
    let engine = open(dir, 20).await;
    let n = 5000;
    for i in 0..n {
        let s = BASE + (i as i64 / 20) * HOUR;
        engine
            .allocate("Bench", Category::Standard, Window::new(s, s + HOUR / 2))
            .await
            .unwrap();
    }
    let stop = CancellationToken::new();
    let start = Instant::now();
    let expired = engine
        .sweep_expired(BASE + (n as i64) * HOUR, &stop)
        .await
        .unwrap();
    println!(
        "  swept {expired} appointments in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    let start = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    let dir = std::env::temp_dir().join(format!("spotbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();

    println!("=== spotbook stress benchmark ===");
    println!("wal dir: {}\n", dir.display());

    println!("[phase 1] sequential allocation throughput");
    phase1_sequential(&dir).await;

    println!("\n[phase 2] contended allocation");
    phase2_contention(&dir).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&dir).await;

    println!("\n[phase 4] sweep and compaction");
    phase4_sweep(&dir).await;

    let _ = std::fs::remove_dir_all(&dir);
    println!("\ndone");
}
