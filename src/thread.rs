//! # Thread Control Block
//!
//! Defines the per-thread record of the runtime: identity, scheduling state,
//! priority, quantum accounting, the owned stack and the saved context.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;

use crate::arch::Context;
use crate::config::{MAIN_THREAD_ID, MAIN_THREAD_PRIORITY, STACK_ALIGN};
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Thread identity
// ---------------------------------------------------------------------------

/// Identifier of a logical thread, unique among live threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The thread that called `init`. Never blocked, never reused.
    pub const MAIN: ThreadId = ThreadId(MAIN_THREAD_ID);

    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_main(self) -> bool {
        self.0 == MAIN_THREAD_ID
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Thread state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a thread.
///
/// ```text
///   ┌──────────┐     dispatch()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲  ▲        quantum expiry       │
///        │  └─────────────────────────────┤
///        │                                │ block()
///        │          resume()         ┌──────────┐
///        └────────────────────────── │ Blocked  │
///                                    └──────────┘
/// ```
///
/// Termination is not a state: the TCB is reclaimed on the spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Executing. Exactly one thread is in this state outside a switch.
    Running,
    /// Waiting in the ready queue.
    Ready,
    /// Excluded from scheduling until resumed.
    Blocked,
}

// ---------------------------------------------------------------------------
// Stack
// ---------------------------------------------------------------------------

/// Fixed-size stack buffer exclusively owned by one thread.
pub struct Stack {
    base: NonNull<u8>,
    layout: Layout,
}

impl Stack {
    /// Allocate a stack of `size` bytes, aligned to `STACK_ALIGN`.
    pub fn new(size: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size, STACK_ALIGN)
            .map_err(|_| Error::StackAllocation { size })?;
        if layout.size() == 0 {
            return Err(Error::StackAllocation { size });
        }
        // SAFETY: layout has non-zero size.
        let base = NonNull::new(unsafe { alloc::alloc(layout) })
            .ok_or(Error::StackAllocation { size })?;
        Ok(Self { base, layout })
    }

    /// Lowest address of the buffer.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// One past the highest address of the buffer.
    #[cfg(test)]
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.layout.size()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with this very layout, freed only here.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Thread Control Block
// ---------------------------------------------------------------------------

/// Entry point of a spawned thread.
pub type Entry = Box<dyn FnOnce() + 'static>;

/// Thread Control Block (TCB).
///
/// The main thread has no stack of its own; every spawned thread owns a
/// `STACK_SIZE` buffer that lives exactly as long as the TCB.
pub struct Thread {
    id: ThreadId,
    state: ThreadState,
    priority: usize,
    quantums: u64,
    context: Context,
    stack: Option<Stack>,
    entry: Option<Entry>,
}

impl Thread {
    /// TCB for the caller of `init`: already running, on its own stack,
    /// and in its first quantum.
    pub fn main() -> Self {
        Self {
            id: ThreadId::MAIN,
            state: ThreadState::Running,
            priority: MAIN_THREAD_PRIORITY,
            quantums: 1,
            context: Context::main(),
            stack: None,
            entry: None,
        }
    }

    /// TCB for a new thread in the Ready state.
    ///
    /// Takes ownership of `stack` and synthesizes a context that starts at
    /// `trampoline` on it. `entry` is kept until the trampoline claims it.
    pub fn spawn(
        id: ThreadId,
        priority: usize,
        entry: Entry,
        mut stack: Stack,
        trampoline: extern "C" fn(),
    ) -> Result<Self> {
        let context = Context::for_entry(&mut stack, trampoline)?;
        Ok(Self {
            id,
            state: ThreadState::Ready,
            priority,
            quantums: 0,
            context,
            stack: Some(stack),
            entry: Some(entry),
        })
    }

    #[inline]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: ThreadState) {
        self.state = state;
    }

    #[inline]
    pub fn priority(&self) -> usize {
        self.priority
    }

    /// Takes effect at the next dispatch of this thread.
    #[inline]
    pub fn set_priority(&mut self, priority: usize) {
        self.priority = priority;
    }

    /// Number of quantums this thread has started.
    #[inline]
    pub fn quantums(&self) -> u64 {
        self.quantums
    }

    /// Record the start of a new quantum.
    #[inline]
    pub fn start_quantum(&mut self) {
        self.quantums += 1;
    }

    #[inline]
    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    #[inline]
    pub fn context(&self) -> &Context {
        &self.context
    }

    #[cfg(test)]
    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    /// Detach the stack from the TCB, e.g. to keep it alive past the TCB.
    pub fn take_stack(&mut self) -> Option<Stack> {
        self.stack.take()
    }

    /// Claim the entry closure. Yields `Some` exactly once per spawned thread.
    pub fn take_entry(&mut self) -> Option<Entry> {
        self.entry.take()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("quantums", &self.quantums)
            .field("stack", &self.stack)
            .field("pending_entry", &self.entry.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::STACK_SIZE;

    extern "C" fn never_run() {}

    fn stack() -> Stack {
        Stack::new(STACK_SIZE).unwrap()
    }

    #[test]
    fn test_main_thread_initialization() {
        let tcb = Thread::main();
        assert_eq!(tcb.id(), ThreadId::MAIN);
        assert!(tcb.id().is_main());
        assert_eq!(tcb.state(), ThreadState::Running);
        assert_eq!(tcb.priority(), MAIN_THREAD_PRIORITY);
        assert_eq!(tcb.quantums(), 1);
        assert!(!tcb.has_stack());
    }

    #[test]
    fn test_spawned_thread_initialization() {
        let mut tcb = Thread::spawn(ThreadId::new(3), 1, Box::new(|| {}), stack(), never_run).unwrap();
        assert_eq!(tcb.id(), ThreadId::new(3));
        assert_eq!(tcb.state(), ThreadState::Ready);
        assert_eq!(tcb.priority(), 1);
        assert_eq!(tcb.quantums(), 0);
        assert!(tcb.has_stack());

        assert!(tcb.take_entry().is_some());
        assert!(tcb.take_entry().is_none());
    }

    #[test]
    fn test_quantum_and_priority_updates() {
        let mut tcb = Thread::spawn(ThreadId::new(1), 0, Box::new(|| {}), stack(), never_run).unwrap();
        tcb.start_quantum();
        tcb.start_quantum();
        assert_eq!(tcb.quantums(), 2);

        tcb.set_priority(4);
        assert_eq!(tcb.priority(), 4);
    }

    #[test]
    fn test_stack_allocation() {
        let mut stack = Stack::new(STACK_SIZE).unwrap();
        assert_eq!(stack.len(), STACK_SIZE);
        let base = stack.as_mut_ptr() as usize;
        assert_eq!(base % STACK_ALIGN, 0);
        assert_eq!(stack.top(), base + STACK_SIZE);

        assert!(matches!(Stack::new(0), Err(Error::StackAllocation { size: 0 })));
    }

    #[test]
    fn test_take_stack_outlives_tcb() {
        let mut tcb = Thread::spawn(ThreadId::new(2), 0, Box::new(|| {}), stack(), never_run).unwrap();
        let stack = tcb.take_stack();
        drop(tcb);
        assert_eq!(stack.map(|s| s.len()), Some(STACK_SIZE));
    }
}
