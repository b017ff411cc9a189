//! regionkv Stress Binary
//!
//! Hammers one region with concurrent puts and destroys from several
//! threads, then reports the destroy statistics.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use regionkv::{Collaborators, MemberId, Region, RegionConfig, VersionMarker};
use tracing_subscriber::{fmt, EnvFilter};

/// regionkv concurrent destroy stress test
#[derive(Parser, Debug)]
#[command(name = "regionkv-stress")]
#[command(about = "Drive concurrent puts and destroys against a region")]
#[command(version)]
struct Args {
    /// Worker threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Distinct keys shared by all workers
    #[arg(short, long, default_value = "64")]
    keys: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "100000")]
    ops: usize,

    /// Enable concurrency checks (local destroys leave tombstones)
    #[arg(short, long)]
    concurrency_checks: bool,

    /// Tombstone retention in milliseconds
    #[arg(long, default_value = "50")]
    tombstone_ms: u64,

    /// Background sweep interval in milliseconds
    #[arg(long, default_value = "10")]
    sweep_ms: u64,

    /// Persistence log path (no log if omitted)
    #[arg(short, long)]
    log: Option<String>,
}

fn main() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,regionkv=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("regionkv stress v{}", regionkv::VERSION);
    tracing::info!(
        threads = args.threads,
        keys = args.keys,
        ops = args.ops,
        concurrency_checks = args.concurrency_checks,
        "starting"
    );

    let mut builder = RegionConfig::builder()
        .name("stress")
        .member_id(MemberId(1))
        .concurrency_checks(args.concurrency_checks)
        .tombstone_timeout(Duration::from_millis(args.tombstone_ms));
    if let Some(log) = &args.log {
        builder = builder.log_path(log);
    }

    let region = match Region::open(builder.build(), Collaborators::new()) {
        Ok(region) => Arc::new(region),
        Err(e) => {
            tracing::error!("Failed to open region: {}", e);
            std::process::exit(1);
        }
    };

    let sweeper = match region.start_tombstone_sweeper(Duration::from_millis(args.sweep_ms)) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!("Failed to start sweeper: {}", e);
            std::process::exit(1);
        }
    };

    let started = Instant::now();
    let workers: Vec<_> = (0..args.threads)
        .map(|worker| {
            let region = Arc::clone(&region);
            let (keys, ops) = (args.keys.max(1), args.ops);
            thread::spawn(move || run_worker(&region, worker, keys, ops))
        })
        .collect();

    for worker in workers {
        if worker.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
    let elapsed = started.elapsed();

    sweeper.stop();
    if let Err(e) = region.close() {
        tracing::error!("Failed to close region: {}", e);
    }

    let total = (args.threads * args.ops) as f64;
    let stats = region.stats();
    tracing::info!(
        elapsed_ms = elapsed.as_millis() as u64,
        ops_per_sec = (total / elapsed.as_secs_f64()) as u64,
        "finished"
    );
    tracing::info!(
        removed = stats.removed,
        tombstoned = stats.tombstoned,
        replays = stats.replays,
        not_found = stats.not_found,
        conditional_mismatches = stats.conditional_mismatches,
        version_conflicts = stats.version_conflicts,
        evictions_suppressed = stats.evictions_suppressed,
        retries = stats.retries,
        tombstones_expired = stats.tombstones_expired,
        log_failures = stats.log_failures,
        "destroy stats"
    );
    tracing::info!(
        live = region.len(),
        tombstones = region.tombstone_count(),
        "final region"
    );
}

/// A fixed, interleaved mix: puts, local destroys, conditional destroys,
/// evictions and destroys replicated from a peer member
fn run_worker(region: &Region, worker: usize, keys: usize, ops: usize) {
    let peer = MemberId(100 + worker as u32);

    for i in 0..ops {
        let key = format!("key-{}", (i * 7 + worker * 13) % keys);
        let value = format!("value-{}-{}", worker, i);

        match (i + worker) % 10 {
            0..=3 => {
                region.put(key, value);
            }
            4..=6 => {
                let _ = region.remove(key);
            }
            7 => {
                let _ = region.remove_if_equals(key, value);
            }
            8 => {
                let _ = region.evict(key);
            }
            _ => {
                let marker = VersionMarker::new(peer, i as u64 + 1, i as u64 + 1);
                let _ = region.apply_remote_destroy(key, marker);
            }
        }
    }
}
