//! Portable context-switch backend built on POSIX `ucontext`.
//!
//! This exists for bootstrapping onto a target with no hand-written
//! assembly backend. It does a full register-set save on every switch via
//! a `getcontext`/`swapcontext` syscall pair and is strictly slower and
//! heavier than the native backends; selecting it is a compile-time choice
//! (the `fallback-ucontext` feature), never an automatic fallback at
//! runtime.

use std::mem::MaybeUninit;

/// Saved hardware state of a suspended silk, as a full `ucontext_t`.
pub struct TaskContext {
    inner: libc::ucontext_t,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskContext {
    /// Creates an empty, unusable context. It must be filled by [`init`]
    /// before the first switch into it.
    ///
    /// [`init`]: TaskContext::init
    pub fn new() -> Self {
        // SAFETY: ucontext_t is plain old data; zero-init is a valid bit
        // pattern libc never reads before we populate it via getcontext.
        let inner = unsafe { MaybeUninit::zeroed().assume_init() };
        Self { inner }
    }

    /// Builds the initial context for a silk: the first [`switch_to`] into
    /// this context lands at `entry`, executing on `[stack_base, stack_base
    /// + stack_size)`.
    ///
    /// [`switch_to`]: TaskContext::switch_to
    ///
    /// # Safety
    ///
    /// `stack_base .. stack_base + stack_size` must be writable memory the
    /// caller owns exclusively for the lifetime of this context.
    pub unsafe fn init(&mut self, entry: super::EntryFn, stack_base: *mut u8, stack_size: usize) {
        let rc = unsafe { libc::getcontext(&mut self.inner) };
        assert_eq!(rc, 0, "getcontext failed");
        self.inner.uc_stack.ss_sp = stack_base as *mut libc::c_void;
        self.inner.uc_stack.ss_size = stack_size;
        self.inner.uc_link = std::ptr::null_mut();
        unsafe {
            libc::makecontext(&mut self.inner, std::mem::transmute(entry), 0);
        }
    }

    /// Switches from `self` to `next`, exactly as the native backends do.
    pub fn switch_to(&mut self, next: &Self) {
        // `swapcontext`'s second argument is not mutated through this
        // pointer even though its C signature is non-const; a private copy
        // is unnecessary here since we only ever read from `next.inner`.
        let next_ptr = &next.inner as *const libc::ucontext_t as *mut libc::ucontext_t;
        let rc = unsafe { libc::swapcontext(&mut self.inner, next_ptr) };
        assert_eq!(rc, 0, "swapcontext failed");
    }
}
