//! # Kernel
//!
//! Process-wide runtime instance and the public thread API.
//!
//! The kernel owns the single [`Scheduler`] of the process, installs the
//! preemption signal handler, and provides the entry trampoline every
//! spawned thread starts in. All public functions run inside a critical
//! section.
//!
//! ## Startup Sequence
//!
//! ```text
//! main()
//!   ├─► kernel::init(&quanta)     ← Handler installed, caller becomes thread 0,
//!   │                               timer armed for its quantum
//!   ├─► kernel::spawn(f, prio)    ← Threads queued (×N)
//!   └─► ... thread 0 keeps running until the first timer expiry
//!         └─► on_preemption()     ← SIGVTALRM: requeue 0, dispatch queue head
//!               └─► thread_start() → f()
//! ```
//!
//! ## Failure policy
//!
//! Usage errors are logged at `warn` and returned. System errors print a
//! `system error:` diagnostic and exit the process with status 1.

use std::any::Any;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::time::Duration;

use critical_section::CriticalSection;
use log::{debug, error, info, trace, warn};

use crate::arch::linux::{self, LinuxPort};
use crate::error::{Error, Result};
use crate::quantum::QuantumTable;
use crate::scheduler::{Scheduler, Terminated};
use crate::sync;
use crate::thread::ThreadId;

// ---------------------------------------------------------------------------
// Global runtime instance
// ---------------------------------------------------------------------------

/// The runtime of this process. Null before `init` and after the main
/// thread terminates.
///
/// Only swapped or dereferenced with preemption masked, so the signal
/// handler never observes a half-updated scheduler.
static RUNTIME: AtomicPtr<Scheduler<LinuxPort>> = AtomicPtr::new(ptr::null_mut());

/// # Safety
/// Call only inside a critical section and do not keep the reference past it.
unsafe fn runtime<'a>() -> Result<&'a mut Scheduler<LinuxPort>> {
    RUNTIME
        .load(Ordering::Acquire)
        .as_mut()
        .ok_or(Error::NotInitialized)
}

/// Run `op` against the runtime with preemption masked.
///
/// A stack parked by a self-terminated thread is freed first: every caller
/// of this function runs on a live thread's stack, outside signal context.
fn guarded<T>(op: impl FnOnce(CriticalSection<'_>, &mut Scheduler<LinuxPort>) -> Result<T>) -> Result<T> {
    sync::critical_section(|cs| {
        // SAFETY: inside the critical section; the reference stays in it.
        let result = unsafe { runtime() }.and_then(|sched| {
            sched.reap(cs);
            op(cs, sched)
        });
        report(result)
    })
}

/// Log usage errors; escalate system errors.
fn report<T>(result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        if err.is_system() {
            fatal(err);
        }
        warn!("thread library error: {err}");
    }
    result
}

/// Unrecoverable: scheduler invariants may be half established.
fn fatal(err: &Error) -> ! {
    if log::log_enabled!(log::Level::Error) {
        error!("system error: {err}");
    } else {
        eprintln!("system error: {err}");
    }
    process::exit(1);
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the runtime. The caller becomes the main thread (id 0).
///
/// `quanta[p]` is the time slice of priority `p`, in process virtual time.
/// Must be called once, before any other function of this module.
///
/// Threads may be preempted anywhere, including inside the allocator. The
/// program must install [`crate::alloc::PreemptionSafeAlloc`] as its
/// `#[global_allocator]` before threads allocate.
pub fn init(quanta: &[Duration]) -> Result<()> {
    sync::critical_section(|_cs| report(install(quanta)))
}

fn install(quanta: &[Duration]) -> Result<()> {
    if !RUNTIME.load(Ordering::Acquire).is_null() {
        return Err(Error::AlreadyInitialized);
    }
    let table = QuantumTable::new(quanta)?;
    linux::install_preemption_handler(on_preemption)?;
    let levels = table.levels();
    let sched = Scheduler::new(table, LinuxPort::new(thread_start))?;
    RUNTIME.store(Box::into_raw(Box::new(sched)), Ordering::Release);
    info!("runtime initialized with {levels} priority levels");
    Ok(())
}

/// Create a thread that runs `entry` at `priority`, queued behind every
/// ready thread.
///
/// Returning from `entry` terminates the thread. A panic in `entry` is
/// logged and terminates the thread as well.
pub fn spawn<F>(entry: F, priority: usize) -> Result<ThreadId>
where
    F: FnOnce() + 'static,
{
    guarded(|cs, sched| sched.spawn(cs, Box::new(entry), priority))
}

/// Change the priority of `id`. A running thread keeps its current quantum.
pub fn change_priority(id: ThreadId, priority: usize) -> Result<()> {
    guarded(|cs, sched| sched.change_priority(cs, id, priority))
}

/// Terminate `id` and release everything it owns.
///
/// - Another thread: reclaimed, returns `Ok(())`.
/// - The calling thread: does not return.
/// - The main thread: every thread is reclaimed and the process exits
///   with status 0. Does not return.
pub fn terminate(id: ThreadId) -> Result<()> {
    let outcome = guarded(|cs, sched| match sched.terminate(cs, id)? {
        Terminated::Process => {
            shutdown(cs)?;
            Ok(Terminated::Process)
        }
        other => Ok(other),
    })?;
    match outcome {
        Terminated::Thread => Ok(()),
        Terminated::Process => process::exit(0),
        Terminated::Running => unreachable!("terminated thread {id} was resumed"),
    }
}

/// Block `id` until it is resumed. Blocking the main thread is an error;
/// blocking the caller switches to the next ready thread.
pub fn block(id: ThreadId) -> Result<()> {
    guarded(|cs, sched| sched.block(cs, id))
}

/// Make a blocked thread ready again. No effect on ready or running threads.
pub fn resume(id: ThreadId) -> Result<()> {
    guarded(|cs, sched| sched.resume(cs, id))
}

/// Id of the calling thread.
pub fn current_id() -> ThreadId {
    sync::critical_section(|_cs| {
        // SAFETY: inside the critical section.
        unsafe { runtime() }
            .map(|sched| sched.current_id())
            .unwrap_or(ThreadId::MAIN)
    })
}

/// Quantums started since `init`, the current one included.
pub fn total_quantums() -> u64 {
    sync::critical_section(|_cs| {
        // SAFETY: inside the critical section.
        unsafe { runtime() }
            .map(|sched| sched.total_quantums())
            .unwrap_or(0)
    })
}

/// Quantums `id` has started, the current one included if it is running.
pub fn quantums_of(id: ThreadId) -> Result<u64> {
    guarded(|_cs, sched| sched.quantums_of(id))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Take the runtime out of the process and reclaim it.
fn shutdown(cs: CriticalSection<'_>) -> Result<()> {
    let raw = RUNTIME.swap(ptr::null_mut(), Ordering::AcqRel);
    if raw.is_null() {
        return Err(Error::NotInitialized);
    }
    // SAFETY: produced by Box::into_raw in `init` and now unreachable from
    // RUNTIME; no other reference is used past this point.
    let sched = unsafe { *Box::from_raw(raw) };
    let total = sched.total_quantums();
    sched.shutdown(cs)?;
    info!("main thread terminated after {total} quantums, exiting");
    Ok(())
}

/// SIGVTALRM handler: the running thread's quantum is over.
extern "C" fn on_preemption(_signal: c_int) {
    sync::critical_section(|cs| {
        // SAFETY: the kernel masks the signal while its handler runs, and
        // RUNTIME only changes with the signal masked.
        if let Ok(sched) = unsafe { runtime() } {
            if let Err(err) = sched.preempt(cs) {
                fatal(&err);
            }
        }
    });
}

/// First code run by every spawned thread, on its own stack.
extern "C" fn thread_start() {
    let entry = sync::critical_section(|cs| {
        // SAFETY: inside the critical section.
        let sched = unsafe { runtime() }.ok()?;
        sched.reap(cs);
        trace!("thread {} starts", sched.current_id());
        sched.take_entry(cs)
    });

    if let Some(entry) = entry {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            let message = panic_message(payload.as_ref());
            sync::critical_section(|_cs| {
                error!("thread {} panicked: {message}", current_id());
            });
        }
    }

    let id = current_id();
    sync::critical_section(|_cs| debug!("thread {id} returned from its entry"));
    // Does not return on success; there is no caller frame to go back to.
    let _ = terminate(id);
    process::abort();
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
