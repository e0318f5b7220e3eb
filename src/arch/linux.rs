//! # Linux Port Layer
//!
//! Hardware-specific code for a Linux process. Implements context switching
//! with the SysV `ucontext` family, the preemption timer with
//! `ITIMER_VIRTUAL`, and the critical section by masking `SIGVTALRM`.
//!
//! ## Context Switch Mechanism
//!
//! A `ucontext_t` carries the callee-visible registers, the stack pointer,
//! the resume address and the signal mask. `swapcontext` stores all of it
//! for the current thread and loads the target in one call, so a thread
//! that was switched out inside a critical section comes back with the
//! preemption signal still masked, and leaves the critical section on its
//! own stack.
//!
//! A fresh thread gets a synthesized context from `makecontext`: stack top
//! of its owned buffer (glibc applies the ABI alignment), resume address
//! set to the port's thread entry, empty signal mask.

use std::fmt;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::raw::c_int;
use std::ptr;
use std::time::Duration;

use crate::arch::Port;
use crate::error::{Error, Result};
use crate::thread::Stack;

/// Signal delivered when the virtual timer expires.
pub const PREEMPTION_SIGNAL: c_int = libc::SIGVTALRM;

extern "C" {
    fn getcontext(ucp: *mut libc::ucontext_t) -> c_int;
    fn setcontext(ucp: *const libc::ucontext_t) -> c_int;
    fn makecontext(ucp: *mut libc::ucontext_t, func: extern "C" fn(), argc: c_int, ...);
    fn swapcontext(oucp: *mut libc::ucontext_t, ucp: *const libc::ucontext_t) -> c_int;
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Saved execution state of one thread.
///
/// Boxed because glibc stores a pointer into the context itself (the FPU
/// save area); the `ucontext_t` must never move once captured.
pub struct Context {
    uc: Box<libc::ucontext_t>,
}

impl Context {
    /// Context of the thread running on the process stack. Empty until the
    /// first switch away from it fills it in.
    pub fn main() -> Self {
        // SAFETY: ucontext_t is plain old data; all-zero is a valid value.
        Self {
            uc: Box::new(unsafe { mem::zeroed() }),
        }
    }

    /// Synthesize a never-run context that starts `entry` on `stack`.
    pub fn for_entry(stack: &mut Stack, entry: extern "C" fn()) -> Result<Self> {
        let mut ctx = Self::main();
        let uc = ctx.as_mut_ptr();
        unsafe {
            if getcontext(uc) != 0 {
                return Err(Error::Context(io::Error::last_os_error()));
            }
            (*uc).uc_stack.ss_sp = stack.as_mut_ptr().cast();
            (*uc).uc_stack.ss_size = stack.len();
            (*uc).uc_stack.ss_flags = 0;
            (*uc).uc_link = ptr::null_mut();
            libc::sigemptyset(&mut (*uc).uc_sigmask);
            makecontext(uc, entry, 0);
        }
        Ok(ctx)
    }

    fn as_mut_ptr(&mut self) -> *mut libc::ucontext_t {
        &mut *self.uc
    }

    fn as_ptr(&self) -> *const libc::ucontext_t {
        &*self.uc
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("uc", &self.as_ptr())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// The real port: switches stacks and arms the process virtual timer.
pub struct LinuxPort {
    entry: extern "C" fn(),
}

impl LinuxPort {
    /// `entry` is where every spawned thread starts executing.
    pub fn new(entry: extern "C" fn()) -> Self {
        Self { entry }
    }
}

impl Port for LinuxPort {
    fn thread_entry(&self) -> extern "C" fn() {
        self.entry
    }

    fn arm_quantum(&mut self, quantum: Duration) -> Result<()> {
        set_virtual_timer(quantum)
    }

    fn disarm(&mut self) -> Result<()> {
        set_virtual_timer(Duration::ZERO)
    }

    unsafe fn switch(&mut self, from: *mut Context, to: *const Context) -> Result<()> {
        if swapcontext((*from).as_mut_ptr(), (*to).as_ptr()) != 0 {
            return Err(Error::Context(io::Error::last_os_error()));
        }
        Ok(())
    }

    unsafe fn resume(&mut self, to: *const Context) -> Result<()> {
        setcontext((*to).as_ptr());
        Err(Error::Context(io::Error::last_os_error()))
    }
}

/// Arm `ITIMER_VIRTUAL` once for `quantum`. A zero duration disarms it.
fn set_virtual_timer(quantum: Duration) -> Result<()> {
    let timer = libc::itimerval {
        it_interval: libc::timeval {
            tv_sec: 0,
            tv_usec: 0,
        },
        it_value: libc::timeval {
            tv_sec: quantum.as_secs() as libc::time_t,
            tv_usec: quantum.subsec_micros() as libc::suseconds_t,
        },
    };
    if unsafe { libc::setitimer(libc::ITIMER_VIRTUAL, &timer, ptr::null_mut()) } != 0 {
        return Err(Error::Timer(io::Error::last_os_error()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Signal plumbing
// ---------------------------------------------------------------------------

/// Install `handler` for the preemption signal.
///
/// The signal stays masked while the handler runs, and interrupted system
/// calls are restarted.
pub fn install_preemption_handler(handler: extern "C" fn(c_int)) -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = MaybeUninit::zeroed().assume_init();
        sa.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaddset(&mut sa.sa_mask, PREEMPTION_SIGNAL);
        sa.sa_flags = libc::SA_RESTART;
        if libc::sigaction(PREEMPTION_SIGNAL, &sa, ptr::null_mut()) != 0 {
            return Err(Error::SignalHandler(io::Error::last_os_error()));
        }
    }
    Ok(())
}

fn preemption_set() -> libc::sigset_t {
    unsafe {
        let mut set = MaybeUninit::<libc::sigset_t>::zeroed();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), PREEMPTION_SIGNAL);
        set.assume_init()
    }
}

/// Whether the preemption signal is currently masked for this OS thread.
pub fn preemption_masked() -> bool {
    unsafe {
        let mut current = MaybeUninit::<libc::sigset_t>::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), current.as_mut_ptr());
        libc::sigismember(current.as_ptr(), PREEMPTION_SIGNAL) == 1
    }
}

/// Critical section implementation: mask the preemption signal.
///
/// The restore state records whether the signal was already masked, so a
/// nested section (or one entered from the signal handler, where the kernel
/// masks the signal for us) leaves the mask alone on release.
struct SignalMaskCriticalSection;
critical_section::set_impl!(SignalMaskCriticalSection);

unsafe impl critical_section::Impl for SignalMaskCriticalSection {
    unsafe fn acquire() -> critical_section::RawRestoreState {
        let set = preemption_set();
        let mut old = MaybeUninit::<libc::sigset_t>::zeroed();
        libc::pthread_sigmask(libc::SIG_BLOCK, &set, old.as_mut_ptr());
        libc::sigismember(old.as_ptr(), PREEMPTION_SIGNAL) == 1
    }

    unsafe fn release(was_masked: critical_section::RawRestoreState) {
        if !was_masked {
            let set = preemption_set();
            libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STACK_SIZE;

    extern "C" fn never_run() {}

    #[test]
    fn test_synthesized_context_uses_owned_stack() {
        let mut stack = Stack::new(STACK_SIZE).unwrap();
        let base = stack.as_mut_ptr();
        let ctx = Context::for_entry(&mut stack, never_run).unwrap();
        unsafe {
            let uc = &*ctx.as_ptr();
            assert_eq!(uc.uc_stack.ss_sp as *mut u8, base);
            assert_eq!(uc.uc_stack.ss_size, STACK_SIZE);
            assert!(uc.uc_link.is_null());
            assert_eq!(libc::sigismember(&uc.uc_sigmask, PREEMPTION_SIGNAL), 0);
        }
    }

    #[test]
    fn test_signal_mask_critical_section_nests() {
        assert!(!preemption_masked());
        critical_section::with(|_| {
            assert!(preemption_masked());
            critical_section::with(|_| assert!(preemption_masked()));
            // The inner release must not unmask the outer section.
            assert!(preemption_masked());
        });
        assert!(!preemption_masked());
    }
}
