//! # Synchronization Primitives
//!
//! Preemption-safe critical sections. All shared scheduler state must be
//! accessed within a critical section so the quantum timer cannot switch
//! threads halfway through a mutation.
//!
//! The `critical-section` implementation for the process lives in
//! [`crate::arch::linux`]: it masks the preemption signal on entry and
//! restores the previous mask on exit.

use critical_section::CriticalSection;

/// Execute a closure with preemption masked.
///
/// Sections nest: only the outermost release unmasks. If the closure
/// switches threads, the section is released by whichever stack resumes
/// inside it, which always matches the mask that thread was saved with.
///
/// Logical threads may use this too, e.g. to print a line without being
/// switched out while holding the stdout lock.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|_cs| {
///     // Touch shared state safely
/// });
/// ```
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Whether preemption is currently masked on this OS thread.
pub fn preemption_masked() -> bool {
    crate::arch::linux::preemption_masked()
}
