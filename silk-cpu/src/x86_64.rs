use core::arch::naked_asm;
use core::fmt;

/// Saved hardware state of a suspended silk.
///
/// Only the callee-saved registers and the stack pointer are kept; the
/// System V AMD64 ABI treats everything else as clobbered by an ordinary
/// call, so the caller of [`TaskContext::switch_to`] has already spilled it.
#[repr(C)]
#[derive(Default)]
pub struct TaskContext {
    /// `RSP` after the callee-saved registers have been pushed.
    rsp: u64,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").field("rsp", &self.rsp).finish()
    }
}

#[repr(C)]
#[derive(Default)]
struct ContextSwitchFrame {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rip: u64,
}

static_assertions::const_assert_eq!(core::mem::size_of::<ContextSwitchFrame>(), 7 * 8);

impl TaskContext {
    /// Creates an empty, unusable context. It must be filled by [`init`]
    /// before the first switch into it.
    ///
    /// [`init`]: TaskContext::init
    pub const fn new() -> Self {
        Self { rsp: 0 }
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
        // x86-64 requires (rsp + 8) be 16-byte aligned at a `call` site. We
        // land here via `ret`, which behaves like returning into a call, so
        // the same alignment must hold once `ContextSwitchFrame` is popped.
        let stack_top = stack_base.add(stack_size) as *mut u64;
        let frame_ptr = (stack_top as *mut ContextSwitchFrame).sub(1);
        debug_assert_eq!(frame_ptr as usize % 16, 0);
        unsafe {
            core::ptr::write(
                frame_ptr,
                ContextSwitchFrame {
                    rip: entry as usize as u64,
                    ..Default::default()
                },
            );
        }
        self.rsp = frame_ptr as u64;
    }

    /// Switches from `self` to `next`: saves the caller's callee-saved
    /// registers and stack pointer into `self`, then restores `next`'s and
    /// resumes on `next`'s stack. Returns once some later switch targets
    /// `self` again.
    ///
    /// Acts as a full compiler barrier: any local not spilled to the stack
    /// before the call may not survive it.
    pub fn switch_to(&mut self, next: &Self) {
        unsafe { context_switch(&mut self.rsp, &next.rsp) }
    }
}

#[unsafe(naked)]
unsafe extern "C" fn context_switch(_current_rsp: *mut u64, _next_rsp: *const u64) {
    naked_asm!(
        "
        push    rbp
        push    rbx
        push    r12
        push    r13
        push    r14
        push    r15
        mov     [rdi], rsp

        mov     rsp, [rsi]
        pop     r15
        pop     r14
        pop     r13
        pop     r12
        pop     rbx
        pop     rbp
        ret
        "
    )
}
