//! # Simulated Port
//!
//! A [`Port`] that records what the scheduler asked of the machine instead
//! of doing it. `switch` and `resume` return immediately, so after a
//! reschedule the caller simply continues "as" the newly dispatched thread.
//! This lets isolated scheduler instances be driven step by step.

use std::time::Duration;

use crate::arch::{Context, Port};
use crate::error::{Error, Result};
use crate::thread::Stack;

/// Recording port.
#[derive(Debug, Default)]
pub struct SimPort {
    /// Every quantum armed, in order.
    pub armed: Vec<Duration>,
    /// Number of context switches (save + restore).
    pub switches: usize,
    /// Number of one-way restores (self-termination).
    pub resumes: usize,
    /// Whether the timer was cancelled.
    pub disarmed: bool,
    /// Refuse every stack allocation while set.
    pub fail_stacks: bool,
}

extern "C" fn never_entered() {
    std::process::abort();
}

impl Port for SimPort {
    fn thread_entry(&self) -> extern "C" fn() {
        never_entered
    }

    fn allocate_stack(&mut self, size: usize) -> Result<Stack> {
        if self.fail_stacks {
            return Err(Error::StackAllocation { size });
        }
        Stack::new(size)
    }

    fn arm_quantum(&mut self, quantum: Duration) -> Result<()> {
        self.armed.push(quantum);
        self.disarmed = false;
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        self.disarmed = true;
        Ok(())
    }

    unsafe fn switch(&mut self, _from: *mut Context, _to: *const Context) -> Result<()> {
        self.switches += 1;
        Ok(())
    }

    unsafe fn resume(&mut self, _to: *const Context) -> Result<()> {
        self.resumes += 1;
        Ok(())
    }
}
