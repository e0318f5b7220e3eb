//! Heap churn from several threads under a very short quantum.
//!
//! Preemptions land inside allocator calls all the time at this rate; the
//! run only survives if the global allocator masks them. Ends by
//! terminating the main thread, which exits with status 0.

use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use uthreads::alloc::PreemptionSafeAlloc;
use uthreads::ThreadId;

#[global_allocator]
static ALLOCATOR: PreemptionSafeAlloc = PreemptionSafeAlloc::new();

const THREADS: usize = 4;
const ITERATIONS: usize = 50_000;
const DEADLINE: Duration = Duration::from_secs(120);

static FINISHED: AtomicUsize = AtomicUsize::new(0);

fn churn(seed: usize) {
    let mut kept: Vec<String> = Vec::new();
    for i in 0..ITERATIONS {
        let n = (seed + i) % 64 + 1;
        let values: Vec<usize> = (0..n).collect();
        assert_eq!(values.iter().sum::<usize>(), n * (n - 1) / 2);

        let label = format!("thread {seed} iteration {i} len {}", values.len());
        assert!(label.ends_with(&n.to_string()));
        kept.push(label);
        if kept.len() > 32 {
            kept.drain(..16);
        }
    }
    FINISHED.fetch_add(1, Ordering::SeqCst);
}

fn main() {
    uthreads::init(&[Duration::from_micros(50)]).unwrap();
    let ids: Vec<ThreadId> = (0..THREADS)
        .map(|seed| uthreads::spawn(move || churn(seed), 0).unwrap())
        .collect();
    assert_eq!(ids.len(), THREADS);

    let start = Instant::now();
    while FINISHED.load(Ordering::SeqCst) < THREADS {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for the churn threads");
        let scratch: Vec<u64> = (0..16).collect();
        hint::black_box(scratch);
    }
    assert!(uthreads::total_quantums() > THREADS as u64);

    uthreads::sync::critical_section(|_cs| println!("alloc_churn: {THREADS} threads ... ok"));
    let _ = uthreads::terminate(ThreadId::MAIN);
    unreachable!("terminating the main thread exits the process");
}
