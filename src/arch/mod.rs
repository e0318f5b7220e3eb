//! # Architecture Abstraction Layer
//!
//! The hardware boundary of the runtime. The scheduler never touches stack
//! pointers, resume addresses or signal masks directly; it only holds
//! opaque [`Context`] values and drives a [`Port`].
//!
//! - [`linux`]: the real port (`ucontext`, `setitimer`, `SIGVTALRM`).
//! - `sim` (unit tests only): a recording port that never leaves the calling
//!   stack, used to drive isolated scheduler instances deterministically.

use std::time::Duration;

use crate::error::Result;
use crate::thread::Stack;

pub mod linux;
#[cfg(test)]
pub(crate) mod sim;

pub use linux::Context;

/// Machine services the scheduler needs from its platform.
pub trait Port {
    /// First instruction of every spawned thread. Synthesized contexts
    /// resume here on their first dispatch.
    fn thread_entry(&self) -> extern "C" fn();

    /// Allocate the stack of a new thread.
    fn allocate_stack(&mut self, size: usize) -> Result<Stack> {
        Stack::new(size)
    }

    /// Arm the one-shot preemption timer for the thread about to run.
    fn arm_quantum(&mut self, quantum: Duration) -> Result<()>;

    /// Cancel any pending preemption.
    fn disarm(&mut self) -> Result<()>;

    /// Save the running state into `from` and restore `to`.
    ///
    /// Returns once `from` is restored again, by a later switch from some
    /// other thread.
    ///
    /// # Safety
    /// Both pointers must reference live contexts that stay at the same
    /// address until `from` is resumed. `to` must be a captured or
    /// synthesized context whose stack is still allocated.
    unsafe fn switch(&mut self, from: *mut Context, to: *const Context) -> Result<()>;

    /// Restore `to` without saving anything. A real port only returns from
    /// this on failure.
    ///
    /// # Safety
    /// Same requirements on `to` as [`Port::switch`].
    unsafe fn resume(&mut self, to: *const Context) -> Result<()>;
}
