//! # uthreads Configuration
//!
//! Compile-time constants governing the runtime. The only runtime
//! configuration is the quantum table handed to [`crate::kernel::init`].

use static_assertions::const_assert;

/// Maximum number of threads (including the main thread) alive at once.
/// This bounds the registry table and the ready queue.
pub const MAX_THREADS: usize = 100;

/// Per-thread stack size in bytes. Must be large enough for the deepest
/// call chain of a thread entry plus the signal frame pushed when the
/// preemption timer fires on that stack.
pub const STACK_SIZE: usize = 256 * 1024;

/// Alignment of every thread stack allocation.
pub const STACK_ALIGN: usize = 16;

/// Id of the thread that calls `init` and keeps running on the process stack.
pub const MAIN_THREAD_ID: usize = 0;

/// Priority given to the main thread at initialization.
pub const MAIN_THREAD_PRIORITY: usize = 0;

const_assert!(MAX_THREADS > 1);
const_assert!(MAIN_THREAD_ID < MAX_THREADS);
const_assert!(STACK_SIZE % STACK_ALIGN == 0);
const_assert!(STACK_ALIGN.is_power_of_two());
