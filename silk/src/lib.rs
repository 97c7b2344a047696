//! A stackful, cooperatively-scheduled micro-thread engine.
//!
//! An [`Engine`] owns a fixed pool of "silks" — lightweight threads of
//! control, each with its own guarded stack carved out of a single mmap'd
//! arena, switched between on one worker OS thread via hand-written
//! architecture-specific context switches rather than OS thread scheduling.
//! Communication between silks, and between ordinary threads and silks,
//! goes through a single bounded FIFO message queue.
//!
//! ```no_run
//! use silk::{Engine, EngineConfig, MsgCode};
//!
//! fn greeter(_arg: *mut ()) {
//!     loop {
//!         let msg = silk::silk_yield();
//!         if matches!(msg.code, MsgCode::TermThread) {
//!             return;
//!         }
//!     }
//! }
//!
//! let engine = Engine::init(EngineConfig::builder().build().unwrap()).unwrap();
//! let silk = engine.alloc(greeter, std::ptr::null_mut()).unwrap();
//! engine.dispatch(silk).unwrap();
//! ```

mod arena;
mod config;
mod engine;
mod error;
mod msg;
mod queue;
mod record;
mod tls;

pub use config::{EngineConfig, EngineConfigBuilder, IdleCallback, MIN_NUM_SILK};
pub use engine::Engine;
pub use error::{AllocError, EngineError, EngineOpError, QueueError};
pub use msg::{Message, MsgCode, APP_CODE_FIRST};
pub use queue::DEFAULT_CAPACITY;
pub use record::{EntryFn, SilkId, SilkRef, SilkState};
pub use tls::ExecutionThread;

/// Suspends the calling silk until the next message addressed to it is
/// dispatched, and returns that message.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a silk.
pub fn silk_yield() -> Message {
    let inner = tls::engine().expect("silk_yield called outside a running silk");
    let id = tls::current().expect("silk_yield called outside a running silk");
    engine::yield_now(&inner, id)
}

/// The id of the silk currently running on the calling thread.
///
/// Independent of any TLS: derived by dividing a stack-local address taken
/// right here by the arena's slot stride, the same trick the trampoline
/// itself uses to identify a freshly-switched-into silk.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a silk.
pub fn silk_my_id() -> SilkId {
    let marker: u8 = 0;
    let inner = tls::engine().expect("silk_my_id called outside a running silk");
    inner.arena.id_of(&marker as *const u8 as usize)
}

/// A reference to the calling silk, suitable for another silk (or the
/// engine itself) to address messages back to it later.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a silk.
pub fn silk_my_ctrl() -> SilkRef {
    let inner = tls::engine().expect("silk_my_ctrl called outside a running silk");
    let id = tls::current().expect("silk_my_ctrl called outside a running silk");
    let generation = inner.records.lock().unwrap()[id.index()].generation;
    SilkRef::for_id(id, generation)
}

/// Kills the calling silk. Never returns: frames between this call and the
/// trampoline's own loop are discarded, not unwound.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a silk.
pub fn silk_kill_self() -> ! {
    let inner = tls::engine().expect("silk_kill_self called outside a running silk");
    let id = tls::current().expect("silk_kill_self called outside a running silk");
    engine::kill_self(&inner, id)
}

/// Kills `id`. If it names the calling silk, this never returns — see
/// [`silk_kill_self`]. Otherwise the target is killed asynchronously, the
/// same as [`Engine::kill`], and this call returns immediately.
///
/// # Panics
///
/// Panics if called from a thread that is not currently running a silk.
pub fn silk_kill_by_id(id: SilkId) {
    let inner = tls::engine().expect("silk_kill_by_id called outside a running silk");
    let caller = tls::current().expect("silk_kill_by_id called outside a running silk");
    engine::kill_by_id(&inner, caller, id);
}
