use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use labslot::model::Lab;
use labslot::notify::NotifyHub;
use labslot::scheduler::{ScheduleError, Scheduler, SchedulerSettings};
use labslot::store::{NewRequest, NewRequester, RequestDate, Store};

const GROUPS: [&str; 3] = ["Tin học", "Vật lý", "Hóa học"];
const LABS_PER_GROUP: usize = 4;
const DAYS: u64 = 20;
const PERIODS: u32 = 10;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        return;
    }
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
        latencies.last().map_or(0.0, |d| d.as_secs_f64() * 1000.0),
    );
}

fn start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 9, 7).unwrap()
}

fn open_store(name: &str) -> (Arc<Store>, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!("labslot_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let store = Arc::new(Store::open(&path, Arc::new(NotifyHub::new())).unwrap());
    (store, dir)
}

fn setup(store: &Store) -> Vec<Lab> {
    let mut labs = Vec::new();
    for group in GROUPS {
        for i in 1..=LABS_PER_GROUP {
            labs.push(store.create_lab(&format!("{group} {i}"), group, 40).unwrap());
        }
    }
    println!("  created {} labs in {} groups", labs.len(), GROUPS.len());
    labs
}

/// `per_slot` requests for every (group, day, period), each from its own requester.
fn submit_requests(store: &Store, per_slot: usize) -> Vec<Ulid> {
    let mut ids = Vec::new();
    let start = Instant::now();
    for day in 0..DAYS {
        let date = start_date().checked_add_days(Days::new(day)).unwrap();
        for period in 1..=PERIODS {
            for group in GROUPS {
                for n in 0..per_slot {
                    let teacher = store
                        .create_requester(NewRequester {
                            full_name: format!("{group} teacher {day}-{period}-{n}"),
                            ..Default::default()
                        })
                        .unwrap();
                    let request = store
                        .submit_request(NewRequest {
                            requester_id: teacher.id,
                            class_name: format!("C{n}"),
                            num_students: 30,
                            group: Some(group.to_string()),
                            when: RequestDate::On(date),
                            period,
                            preferred_lab: None,
                        })
                        .unwrap();
                    ids.push(request.id);
                }
            }
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {} requests in {:.2}s = {:.0} ops/sec",
        ids.len(),
        elapsed.as_secs_f64(),
        ids.len() as f64 / elapsed.as_secs_f64()
    );
    ids
}

fn phase1_batch(per_slot: usize) {
    let (store, dir) = open_store("batch");
    setup(&store);
    submit_requests(&store, per_slot);
    let scheduler = Scheduler::new(store.clone(), SchedulerSettings::default());

    let start = Instant::now();
    let summary = scheduler.run_auto_schedule().unwrap();
    let elapsed = start.elapsed();
    println!(
        "  auto-schedule: {} assigned, {} conflicts in {:.2}s",
        summary.assigned,
        summary.conflicts,
        elapsed.as_secs_f64()
    );
    let _ = std::fs::remove_dir_all(&dir);
}

fn phase2_concurrent_assign(threads: usize, per_slot: usize) {
    let (store, dir) = open_store("concurrent");
    setup(&store);
    let ids = submit_requests(&store, per_slot);
    let scheduler = Arc::new(Scheduler::new(store.clone(), SchedulerSettings::default()));

    let chunk = ids.len().div_ceil(threads);
    let start = Instant::now();
    let mut latencies: Vec<Duration> = Vec::new();
    let mut conflicts = 0usize;
    std::thread::scope(|s| {
        let handles: Vec<_> = ids
            .chunks(chunk)
            .map(|part| {
                let scheduler = scheduler.clone();
                s.spawn(move || {
                    let mut lat = Vec::with_capacity(part.len());
                    let mut lost = 0usize;
                    for id in part {
                        let t = Instant::now();
                        match scheduler.assign(*id) {
                            Ok(_) => {}
                            Err(ScheduleError::NoEligibleResource { .. }) => lost += 1,
                            Err(e) => panic!("assign failed: {e}"),
                        }
                        lat.push(t.elapsed());
                    }
                    (lat, lost)
                })
            })
            .collect();
        for handle in handles {
            let (lat, lost) = handle.join().unwrap();
            latencies.extend(lat);
            conflicts += lost;
        }
    });
    let elapsed = start.elapsed();

    let expected = GROUPS.len() * LABS_PER_GROUP * DAYS as usize * PERIODS as usize;
    assert_eq!(store.reservation_count(), expected.min(ids.len()));
    println!(
        "  {threads} threads: {} assigns in {:.2}s = {:.0} ops/sec, {conflicts} conflicts",
        ids.len(),
        elapsed.as_secs_f64(),
        ids.len() as f64 / elapsed.as_secs_f64()
    );
    print_latency("assign latency", &mut latencies);
    let _ = std::fs::remove_dir_all(&dir);
}

fn phase3_explain(per_slot: usize) {
    let (store, dir) = open_store("explain");
    setup(&store);
    let ids = submit_requests(&store, per_slot);
    let scheduler = Scheduler::new(store.clone(), SchedulerSettings::default());
    scheduler.run_auto_schedule().unwrap();

    let mut latencies = Vec::new();
    for id in ids.iter().step_by(7) {
        let t = Instant::now();
        scheduler.explain_default(*id).unwrap();
        latencies.push(t.elapsed());
    }
    print_latency("explain latency", &mut latencies);
    let _ = std::fs::remove_dir_all(&dir);
}

fn phase4_replay() {
    let (store, dir) = open_store("replay");
    setup(&store);
    submit_requests(&store, 2);
    Scheduler::new(store.clone(), SchedulerSettings::default())
        .run_auto_schedule()
        .unwrap();
    let path = dir.join("replay.wal");
    drop(store);

    let start = Instant::now();
    let reopened = Store::open(&path, Arc::new(NotifyHub::new())).unwrap();
    println!(
        "  replayed {} requests, {} reservations in {:.2}ms",
        reopened.request_count(),
        reopened.reservation_count(),
        start.elapsed().as_secs_f64() * 1000.0
    );

    let start = Instant::now();
    reopened.compact().unwrap();
    println!("  compacted in {:.2}ms", start.elapsed().as_secs_f64() * 1000.0);
    let _ = std::fs::remove_dir_all(&dir);
}

fn main() {
    let threads: usize = std::env::var("BENCH_THREADS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8);

    println!("=== labslot stress benchmark ===\n");

    println!("[phase 1] batch auto-schedule, oversubscribed 2x");
    phase1_batch(LABS_PER_GROUP * 2);

    println!("\n[phase 2] concurrent single assignments");
    phase2_concurrent_assign(threads, LABS_PER_GROUP + 2);

    println!("\n[phase 3] conflict diagnosis");
    phase3_explain(LABS_PER_GROUP + 1);

    println!("\n[phase 4] log replay and compaction");
    phase4_replay();
}
