//! # uthreads — User-Level Preemptive Threads
//!
//! A thread runtime that lives entirely inside one Linux process. Many
//! logical threads are multiplexed onto a single OS thread with their own
//! fixed-size stacks; a virtual-time interval timer preempts the running
//! thread when its quantum runs out.
//!
//! ## Overview
//!
//! - **One runs at a time**: there is no parallelism, only interleaving
//!   between the running thread and the preemption signal
//! - **Strict FIFO**: ready threads run in arrival order
//! - **Priority = quantum length**: a thread's priority picks how long it
//!   may run once dispatched, never where it waits in the queue
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Logical Threads                      │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   init() · spawn() · block() · resume() · terminate()  │
//! ├──────────────┬────────────────────┬───────────────────┤
//! │  Scheduler   │   Registry         │  Sync             │
//! │  scheduler.rs│   registry.rs      │  sync.rs          │
//! │  ─ dispatch()│   ─ allocate_id()  │  ─ critical_section│
//! │  ─ preempt() │   ─ release()      │                   │
//! ├──────────────┴────────────────────┴───────────────────┤
//! │      Thread Model (thread.rs) · Quanta (quantum.rs)     │
//! │          TCB · ThreadState · Stack · QuantumTable       │
//! ├────────────────────────────────────────────────────────┤
//! │              Arch Port (arch/linux.rs)                  │
//! │   ucontext switch · ITIMER_VIRTUAL · SIGVTALRM masking  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use uthreads::alloc::PreemptionSafeAlloc;
//! use uthreads::ThreadId;
//!
//! #[global_allocator]
//! static ALLOCATOR: PreemptionSafeAlloc = PreemptionSafeAlloc::new();
//!
//! fn main() {
//!     uthreads::init(&[Duration::from_millis(10), Duration::from_millis(50)]).unwrap();
//!     let worker = uthreads::spawn(|| loop { std::hint::spin_loop() }, 1).unwrap();
//!     // ... main keeps running until its quantum expires ...
//!     uthreads::terminate(worker).unwrap();
//!     uthreads::terminate(ThreadId::MAIN).unwrap(); // exits the process with status 0
//! }
//! ```
//!
//! ## Memory Model
//!
//! - **Fixed capacity**: at most `MAX_THREADS` threads, ids reused
//!   smallest-first
//! - **Per-thread stack**: `STACK_SIZE` bytes, freed when the thread is
//!   terminated
//! - **Critical sections**: the preemption signal is masked around every
//!   scheduler mutation
//! - **Heap**: threads share one allocator with no lock of its own; programs
//!   install [`alloc::PreemptionSafeAlloc`] as their global allocator

#[cfg(not(target_os = "linux"))]
compile_error!("uthreads relies on ucontext and ITIMER_VIRTUAL and only supports Linux");

pub mod alloc;
pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod quantum;
pub mod registry;
pub mod scheduler;
pub mod sync;
pub mod thread;

pub use error::{Error, Result};
pub use kernel::{
    block, change_priority, current_id, init, quantums_of, resume, spawn, terminate,
    total_quantums,
};
pub use thread::{ThreadId, ThreadState};
