//! # Errors
//!
//! Two disjoint classes share one enum. Usage errors are returned to the
//! caller with no state mutated. System errors mean a scheduler invariant
//! (handler installed, timer armed, stack present) may be half established;
//! the kernel layer turns them into a diagnostic and `exit(1)`.

use std::io;

use thiserror::Error;

use crate::thread::ThreadId;

/// Result alias used throughout the runtime.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("quantum table must contain at least one priority level")]
    EmptyQuantumTable,

    #[error("quantum for priority {priority} must be at least one microsecond")]
    InvalidQuantum { priority: usize },

    #[error("invalid priority {0}")]
    InvalidPriority(usize),

    #[error("no thread with id {0}")]
    NoSuchThread(ThreadId),

    #[error("the main thread cannot be blocked")]
    BlockMain,

    #[error("thread limit of {0} reached")]
    Exhausted(usize),

    #[error("runtime is already initialized")]
    AlreadyInitialized,

    #[error("runtime is not initialized")]
    NotInitialized,

    #[error("failed to allocate a {size}-byte thread stack")]
    StackAllocation { size: usize },

    #[error("failed to install the preemption signal handler: {0}")]
    SignalHandler(#[source] io::Error),

    #[error("failed to arm the virtual timer: {0}")]
    Timer(#[source] io::Error),

    #[error("failed to build or switch execution context: {0}")]
    Context(#[source] io::Error),

    #[error("ready queue is empty at dispatch")]
    EmptyReadyQueue,
}

impl Error {
    /// True for unrecoverable failures of the underlying system.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Error::StackAllocation { .. }
                | Error::SignalHandler(_)
                | Error::Timer(_)
                | Error::Context(_)
                | Error::EmptyReadyQueue
        )
    }
}
