//! Architecture-specific stackful context-switch primitive.
//!
//! A [`TaskContext`] holds exactly the callee-preserved registers and the
//! stack pointer of a suspended silk — nothing else. Floating-point/SIMD
//! registers are never saved; a silk must not rely on them surviving a
//! switch. The switch itself ([`TaskContext::switch_to`]) presents as an
//! ordinary function call to the compiler, so the C ABI has already spilled
//! any caller-saved registers before it is reached; saving only the
//! callee-preserved set is what makes this strictly smaller and faster than
//! a `ucontext`-style full-state save.
//!
//! Exactly one backend is compiled in, selected by target architecture. The
//! `fallback-ucontext` feature swaps in a POSIX `ucontext`-based
//! implementation for architectures with no hand-written backend; it is a
//! compile-time choice, never a runtime one.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

cfg_if::cfg_if! {
    if #[cfg(feature = "fallback-ucontext")] {
        mod fallback;
        pub use fallback::TaskContext;
    } else if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::TaskContext;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::TaskContext;
    } else {
        compile_error!(
            "silk-cpu has no native backend for this target architecture; \
             enable the `fallback-ucontext` feature to use the portable ucontext backend"
        );
    }
}

/// The entry point a freshly built [`TaskContext`] begins executing at.
///
/// Called with no arguments; the silk discovers its identity by dividing a
/// stack-local address by the arena's slot size (see `silk::arena`), not
/// through any parameter passed here.
pub type EntryFn = unsafe extern "C" fn() -> !;
