//! # uthreads demo
//!
//! Runs a small workload on the runtime:
//!
//! | Thread | Priority | Behavior |
//! |--------|----------|----------|
//! | main (0) | 0 | Spawns everything, spins until the workers are done |
//! | workers | `n % levels` | Burn CPU, report each new quantum, return after `--rounds` |
//! | sleeper | 0 | Blocks itself until main resumes it |
//!
//! Workers return from their entry, which terminates them. Main finally
//! terminates itself, which reclaims the runtime and exits with status 0.
//!
//! Built with the `demo` feature: `cargo run --features demo -- -v`.

use std::hint;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use uthreads::alloc::PreemptionSafeAlloc;
use uthreads::sync;
use uthreads::ThreadId;

#[global_allocator]
static ALLOCATOR: PreemptionSafeAlloc = PreemptionSafeAlloc::new();

/// Busy-loop iterations between two looks at the quantum counter.
const WORK_CHUNK: u32 = 200_000;

static FINISHED: AtomicUsize = AtomicUsize::new(0);
static PARKED: AtomicBool = AtomicBool::new(false);
static WOKEN: AtomicBool = AtomicBool::new(false);

/// Demonstrates preemptive user-level threads on a single OS thread.
#[derive(Debug, Parser)]
struct Opts {
    /// Quantum per priority level, in microseconds of process CPU time.
    #[clap(short = 'q', long, value_delimiter = ',', default_value = "10000,25000")]
    quantum_us: Vec<u64>,

    /// Number of worker threads.
    #[clap(short = 't', long, default_value = "3")]
    threads: usize,

    /// Quantums each worker runs before returning.
    #[clap(short = 'r', long, default_value = "4")]
    rounds: u64,

    /// Enable verbose output. Specify multiple times to increase verbosity.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Burn CPU until this thread has started `rounds` quantums.
fn worker(rounds: u64) {
    let me = uthreads::current_id();
    let mut seen = 0;
    while seen < rounds {
        let mut work: u32 = 0;
        for _ in 0..WORK_CHUNK {
            work = hint::black_box(work.wrapping_add(1));
        }
        let now = uthreads::quantums_of(me).unwrap_or(seen);
        if now != seen {
            seen = now;
            sync::critical_section(|_cs| {
                info!(
                    "thread {me}: quantum {now}/{rounds} (process total {})",
                    uthreads::total_quantums()
                );
            });
        }
    }
    FINISHED.fetch_add(1, Ordering::SeqCst);
}

fn sleeper() {
    let me = uthreads::current_id();
    // Publishing PARKED and blocking must not be split by a preemption, or
    // main could resume us before we block.
    let blocked = sync::critical_section(|_cs| {
        info!("thread {me}: blocking until resumed");
        PARKED.store(true, Ordering::SeqCst);
        uthreads::block(me)
    });
    if blocked.is_ok() {
        WOKEN.store(true, Ordering::SeqCst);
        sync::critical_section(|_cs| info!("thread {me}: resumed"));
    }
}

fn spin_until(done: impl Fn() -> bool) {
    while !done() {
        hint::spin_loop();
    }
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    let llv = match opts.verbose {
        0 => simplelog::LevelFilter::Info,
        1 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        llv,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let quanta: Vec<Duration> = opts
        .quantum_us
        .iter()
        .map(|&usecs| Duration::from_micros(usecs))
        .collect();
    uthreads::init(&quanta).context("failed to initialize the thread runtime")?;

    for n in 0..opts.threads {
        let rounds = opts.rounds;
        let priority = n % quanta.len();
        let id = uthreads::spawn(move || worker(rounds), priority)
            .with_context(|| format!("failed to spawn worker {n}"))?;
        sync::critical_section(|_cs| info!("spawned worker {id} at priority {priority}"));
    }
    let sleeper_id = uthreads::spawn(sleeper, 0).context("failed to spawn the sleeper")?;

    spin_until(|| FINISHED.load(Ordering::SeqCst) == opts.threads && PARKED.load(Ordering::SeqCst));
    sync::critical_section(|_cs| info!("all workers finished, waking thread {sleeper_id}"));
    uthreads::resume(sleeper_id)?;
    spin_until(|| WOKEN.load(Ordering::SeqCst));

    sync::critical_section(|_cs| {
        info!(
            "main ran {} quantums out of {}",
            uthreads::quantums_of(ThreadId::MAIN).unwrap_or(0),
            uthreads::total_quantums()
        );
    });
    uthreads::terminate(ThreadId::MAIN)?;
    unreachable!("terminating the main thread exits the process");
}
