//! # Scheduler
//!
//! Core scheduling logic for uthreads: the ready queue, dispatch, the
//! reschedule protocol and the state machine behind every public operation.
//!
//! ## Scheduling Algorithm
//!
//! Ready threads are served in strict arrival order. Priority never changes
//! queue position; it only selects how long the dispatched thread may run
//! before the preemption timer fires.
//!
//! At each scheduling point:
//! 1. **Dispose of the running thread**: requeue it at the tail (timer
//!    expiry) or leave it out (it blocked or terminated itself)
//! 2. **Dispatch**: pop the queue head, mark it Running, count the quantum
//!    for the thread and for the process, arm the timer for its priority
//! 3. **Context switch**: save the old thread, restore the new one
//!
//! Every mutating method takes a [`CriticalSection`] token: scheduler state
//! is only ever touched with the preemption signal masked.

use std::collections::VecDeque;
use std::mem;

use critical_section::CriticalSection;
use log::{debug, trace};

use crate::arch::{Context, Port};
use crate::config::{MAIN_THREAD_PRIORITY, MAX_THREADS, STACK_SIZE};
use crate::error::{Error, Result};
use crate::quantum::QuantumTable;
use crate::registry::Registry;
use crate::thread::{Entry, Stack, Thread, ThreadId, ThreadState};

/// What happens to the running thread when the scheduler takes over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Quantum expired: back to the tail of the ready queue.
    Requeue,
    /// The caller already set its state (Blocked) or removed it.
    Exclude,
}

/// Outcome of [`Scheduler::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminated {
    /// Another thread was reclaimed; the caller carries on.
    Thread,
    /// The caller terminated itself and another thread was dispatched.
    /// On a real port this is never observed by the terminated thread.
    Running,
    /// The main thread was named: the caller must [`Scheduler::shutdown`]
    /// and exit the process.
    Process,
}

/// The runtime state: every TCB, the ready queue and the counters.
pub struct Scheduler<P: Port> {
    port: P,
    quanta: QuantumTable,
    threads: Registry,
    ready: VecDeque<ThreadId>,
    running: ThreadId,
    total_quantums: u64,
    /// Stack of a thread that terminated itself, freed once execution has
    /// moved to another stack.
    graveyard: Option<Stack>,
}

impl<P: Port> Scheduler<P> {
    /// Build the runtime around the calling thread, which becomes the main
    /// thread in its first quantum, and arm the timer for it.
    pub fn new(quanta: QuantumTable, mut port: P) -> Result<Self> {
        port.arm_quantum(quanta.quantum(MAIN_THREAD_PRIORITY))?;
        Ok(Self {
            port,
            quanta,
            threads: Registry::new(Thread::main()),
            // Requeueing happens in signal context and must not allocate.
            ready: VecDeque::with_capacity(MAX_THREADS),
            running: ThreadId::MAIN,
            total_quantums: 1,
            graveyard: None,
        })
    }

    // -----------------------------------------------------------------------
    // Public operations
    // -----------------------------------------------------------------------

    /// Create a Ready thread at the tail of the queue.
    ///
    /// Fails without touching any state if the priority is unknown or every
    /// id is taken.
    pub fn spawn(&mut self, _cs: CriticalSection<'_>, entry: Entry, priority: usize) -> Result<ThreadId> {
        self.quanta.validate(priority)?;
        let id = self.threads.allocate_id()?;
        let trampoline = self.port.thread_entry();
        let thread = match self
            .port
            .allocate_stack(STACK_SIZE)
            .and_then(|stack| Thread::spawn(id, priority, entry, stack, trampoline))
        {
            Ok(thread) => thread,
            Err(err) => {
                self.threads.restore_id(id);
                return Err(err);
            }
        };
        self.threads.insert(thread);
        self.ready.push_back(id);
        debug!("spawned thread {id} at priority {priority}");
        Ok(id)
    }

    /// Update a thread's priority. A running thread keeps its armed quantum;
    /// the new priority applies from its next dispatch.
    pub fn change_priority(&mut self, _cs: CriticalSection<'_>, id: ThreadId, priority: usize) -> Result<()> {
        let thread = self.threads.get_mut(id)?;
        self.quanta.validate(priority)?;
        thread.set_priority(priority);
        debug!("thread {id} priority -> {priority}");
        Ok(())
    }

    /// Terminate `id`.
    ///
    /// Another thread is reclaimed immediately. The running thread gives up
    /// its id and TCB at once; its stack is parked until execution has left
    /// it, then it never runs again. The main thread is not touched here,
    /// see [`Terminated::Process`].
    pub fn terminate(&mut self, cs: CriticalSection<'_>, id: ThreadId) -> Result<Terminated> {
        let state = self.threads.get(id)?.state();
        if id.is_main() {
            return Ok(Terminated::Process);
        }
        if id == self.running {
            debug!("thread {id} terminates itself");
            self.exit_running(cs)?;
            return Ok(Terminated::Running);
        }
        if state == ThreadState::Ready {
            self.dequeue(id);
        }
        self.threads.release(id);
        debug!("terminated thread {id}");
        Ok(Terminated::Thread)
    }

    /// Block `id`. Blocking the running thread switches to the queue head.
    pub fn block(&mut self, _cs: CriticalSection<'_>, id: ThreadId) -> Result<()> {
        let state = self.threads.get(id)?.state();
        if id.is_main() {
            return Err(Error::BlockMain);
        }
        match state {
            ThreadState::Blocked => Ok(()),
            ThreadState::Ready => {
                self.dequeue(id);
                self.threads.get_mut(id)?.set_state(ThreadState::Blocked);
                debug!("blocked thread {id}");
                Ok(())
            }
            ThreadState::Running => {
                self.threads.get_mut(id)?.set_state(ThreadState::Blocked);
                debug!("thread {id} blocks itself");
                self.reschedule(Disposition::Exclude)
            }
        }
    }

    /// Move a Blocked thread to the tail of the ready queue. No-op otherwise.
    pub fn resume(&mut self, _cs: CriticalSection<'_>, id: ThreadId) -> Result<()> {
        let thread = self.threads.get_mut(id)?;
        if thread.state() == ThreadState::Blocked {
            thread.set_state(ThreadState::Ready);
            self.ready.push_back(id);
            debug!("resumed thread {id}");
        }
        Ok(())
    }

    /// Quantum expiry: requeue the running thread and dispatch the next.
    ///
    /// Runs in signal context. Nothing on this path allocates, frees or logs.
    pub fn preempt(&mut self, _cs: CriticalSection<'_>) -> Result<()> {
        self.reschedule(Disposition::Requeue)
    }

    /// Claim the entry closure of the running thread, if it has not started.
    pub fn take_entry(&mut self, _cs: CriticalSection<'_>) -> Option<Entry> {
        self.threads.get_mut(self.running).ok()?.take_entry()
    }

    /// Free the stack of a thread that terminated itself.
    ///
    /// Must not be called from signal context: the interrupted code may be
    /// inside the allocator.
    pub fn reap(&mut self, _cs: CriticalSection<'_>) {
        if self.graveyard.take().is_some() {
            trace!("reclaimed stack of a self-terminated thread");
        }
    }

    /// Tear the runtime down ahead of process exit: cancel the timer and
    /// reclaim every thread other than main.
    ///
    /// If the caller is not the main thread it is still running on its own
    /// stack; that one buffer is left for the process exit to reclaim.
    ///
    /// Hands the disarmed port back to the caller.
    pub fn shutdown(mut self, _cs: CriticalSection<'_>) -> Result<P> {
        self.port.disarm()?;
        self.ready.clear();
        self.graveyard = None;
        let others: Vec<ThreadId> = self.threads.ids().filter(|id| !id.is_main()).collect();
        for id in others {
            if let Some(mut thread) = self.threads.release(id) {
                if id == self.running {
                    mem::forget(thread.take_stack());
                }
            }
        }
        debug!("runtime shut down after {} quantums", self.total_quantums);
        Ok(self.port)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[inline]
    pub fn current_id(&self) -> ThreadId {
        self.running
    }

    #[inline]
    pub fn total_quantums(&self) -> u64 {
        self.total_quantums
    }

    pub fn quantums_of(&self, id: ThreadId) -> Result<u64> {
        Ok(self.threads.get(id)?.quantums())
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Hand the processor to the ready-queue head.
    ///
    /// Returns when the current thread is dispatched again, or right away if
    /// it is itself the head.
    fn reschedule(&mut self, disposition: Disposition) -> Result<()> {
        let prev = self.running;
        if disposition == Disposition::Requeue {
            self.threads.get_mut(prev)?.set_state(ThreadState::Ready);
            self.ready.push_back(prev);
        }
        let next = self.dispatch()?;
        if next == prev {
            return Ok(());
        }
        let from: *mut Context = self.threads.get_mut(prev)?.context_mut();
        let to: *const Context = self.threads.get(next)?.context();
        // SAFETY: both contexts are boxed inside live TCBs. `prev` stays
        // registered while it is switched out; `next` was dispatched from the
        // ready queue, so its stack is allocated.
        unsafe { self.port.switch(from, to) }
    }

    /// Leave the running thread for good: release its id and TCB, park its
    /// stack, dispatch the queue head and restore it without saving.
    fn exit_running(&mut self, cs: CriticalSection<'_>) -> Result<()> {
        let id = self.running;
        self.reap(cs);
        if let Some(mut thread) = self.threads.release(id) {
            self.graveyard = thread.take_stack();
        }
        let next = self.dispatch()?;
        let to: *const Context = self.threads.get(next)?.context();
        // SAFETY: `next` is a live, dispatched TCB. The parked stack we are
        // still executing on is not freed until another guarded operation.
        unsafe { self.port.resume(to) }
    }

    /// Pop the queue head and make it the running thread.
    fn dispatch(&mut self) -> Result<ThreadId> {
        let next = self.ready.pop_front().ok_or(Error::EmptyReadyQueue)?;
        let thread = self.threads.get_mut(next)?;
        thread.set_state(ThreadState::Running);
        thread.start_quantum();
        let quantum = self.quanta.quantum(thread.priority());
        self.total_quantums += 1;
        self.running = next;
        self.port.arm_quantum(quantum)?;
        Ok(next)
    }

    fn dequeue(&mut self, id: ThreadId) {
        if let Some(position) = self.ready.iter().position(|&queued| queued == id) {
            self.ready.remove(position);
        }
    }
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

#[cfg(test)]
impl<P: Port> Scheduler<P> {
    pub fn state_of(&self, id: ThreadId) -> Result<ThreadState> {
        Ok(self.threads.get(id)?.state())
    }

    pub fn priority_of(&self, id: ThreadId) -> Result<usize> {
        Ok(self.threads.get(id)?.priority())
    }

    pub fn is_valid(&self, id: ThreadId) -> bool {
        self.threads.is_valid(id)
    }

    /// Ready queue from head to tail.
    pub fn ready_ids(&self) -> impl Iterator<Item = ThreadId> + '_ {
        self.ready.iter().copied()
    }

    /// Number of live threads, main included.
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn quanta(&self) -> &QuantumTable {
        &self.quanta
    }

    pub fn port(&self) -> &P {
        &self.port
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
