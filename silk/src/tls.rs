use std::cell::{Cell, RefCell, UnsafeCell};
use std::sync::Arc;

use crate::engine::EngineInner;
use crate::record::SilkId;

/// Per-worker-thread state, located via `thread_local!` rather than stored
/// alongside the silk stacks — unlike `my_id`, there is no cheap way to
/// derive "which worker am I" from an address, since the worker's own call
/// stack is not one of the arena's slots.
struct WorkerState {
    engine: RefCell<Option<Arc<EngineInner>>>,
    /// The silk this worker is currently executing, if any. `None` while
    /// the worker is in its own dispatch loop.
    current: Cell<Option<SilkId>>,
    /// The worker's own context, switched into whenever a silk suspends.
    home: UnsafeCell<silk_cpu::TaskContext>,
}

thread_local! {
    static WORKER_STATE: WorkerState = WorkerState {
        engine: RefCell::new(None),
        current: Cell::new(None),
        home: UnsafeCell::new(silk_cpu::TaskContext::new()),
    };
}

/// Handle passed to an [`crate::EngineConfig`] idle callback.
///
/// Carries the opaque `ctx` pointer configured on the engine; the engine
/// itself never dereferences it.
pub struct ExecutionThread {
    ctx: *mut (),
}

impl ExecutionThread {
    pub(crate) fn new(ctx: *mut ()) -> Self {
        Self { ctx }
    }

    /// The `ctx` pointer configured via `EngineConfigBuilder::ctx`.
    pub fn ctx(&self) -> *mut () {
        self.ctx
    }
}

pub(crate) fn bind_engine(engine: Arc<EngineInner>) {
    WORKER_STATE.with(|et| *et.engine.borrow_mut() = Some(engine));
}

pub(crate) fn unbind_engine() {
    WORKER_STATE.with(|et| *et.engine.borrow_mut() = None);
}

/// The engine owning the calling worker thread, if any.
pub(crate) fn engine() -> Option<Arc<EngineInner>> {
    WORKER_STATE.with(|et| et.engine.borrow().clone())
}

pub(crate) fn set_current(id: SilkId) {
    WORKER_STATE.with(|et| et.current.set(Some(id)));
}

pub(crate) fn clear_current() {
    WORKER_STATE.with(|et| et.current.set(None));
}

/// The silk currently running on the calling worker thread, if any.
pub(crate) fn current() -> Option<SilkId> {
    WORKER_STATE.with(|et| et.current.get())
}

/// Raw pointer to this worker's home context.
///
/// Valid for as long as the worker thread is alive; the `thread_local`
/// storage never moves once initialized.
pub(crate) fn home_ctx() -> *mut silk_cpu::TaskContext {
    WORKER_STATE.with(|et| et.home.get())
}
