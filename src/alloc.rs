//! # Preemption-Safe Allocator
//!
//! Every logical thread shares one OS thread, so the system allocator takes
//! no lock on their behalf. A preemption that lands inside `malloc` and
//! switches to another thread that allocates corrupts the heap.
//!
//! [`PreemptionSafeAlloc`] runs every allocator call inside a critical
//! section. Install it as the global allocator of any program that calls
//! [`crate::init`]:
//!
//! ```ignore
//! #[global_allocator]
//! static ALLOCATOR: uthreads::alloc::PreemptionSafeAlloc = uthreads::alloc::PreemptionSafeAlloc::new();
//! ```

use std::alloc::{GlobalAlloc, Layout, System};

/// Wraps an allocator so the preemption signal is masked for the duration
/// of each call.
#[derive(Debug, Default)]
pub struct PreemptionSafeAlloc<A = System> {
    inner: A,
}

impl PreemptionSafeAlloc<System> {
    pub const fn new() -> Self {
        Self { inner: System }
    }
}

impl<A> PreemptionSafeAlloc<A> {
    pub const fn with_inner(inner: A) -> Self {
        Self { inner }
    }
}

// The critical-section implementation only touches the signal mask, so it
// never re-enters the allocator.
unsafe impl<A: GlobalAlloc> GlobalAlloc for PreemptionSafeAlloc<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        critical_section::with(|_cs| self.inner.alloc(layout))
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        critical_section::with(|_cs| self.inner.alloc_zeroed(layout))
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        critical_section::with(|_cs| self.inner.dealloc(ptr, layout))
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        critical_section::with(|_cs| self.inner.realloc(ptr, layout, new_size))
    }
}
