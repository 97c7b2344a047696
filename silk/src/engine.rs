use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::arena::StackArena;
use crate::config::EngineConfig;
use crate::error::{AllocError, EngineError, EngineOpError};
use crate::msg::{Message, MsgCode, RawMessage};
use crate::queue::MessageQueue;
use crate::record::{EntryFn, FreeList, SilkId, SilkRecord, SilkRef, SilkState};
use crate::tls;

/// The running engine: an arena of stacks, a pool of silk records, a
/// message queue, and the one worker thread that switches between them.
///
/// Cloning an `Engine` is cheap and shares the same underlying worker;
/// `join` on any clone waits for that worker to exit.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) arena: StackArena,
    pub(crate) records: Mutex<Vec<SilkRecord>>,
    pub(crate) free_list: Mutex<FreeList>,
    pub(crate) queue: MessageQueue,
    boot_done: Mutex<bool>,
    boot_count: Mutex<u32>,
    boot_cv: Condvar,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Maps the stack arena, queues a `Boot` message for every silk but 0,
    /// and spawns the worker thread. Blocks until every silk has reached
    /// [`SilkState::Free`] — the original library busy-polled for this;
    /// here the worker signals a condvar the moment the last boot
    /// completes, so `init` parks instead of spinning.
    pub fn init(cfg: EngineConfig) -> Result<Self, EngineError> {
        let arena = StackArena::map(&cfg)?;
        let mut records = Vec::with_capacity(cfg.num_silk as usize);
        for i in 0..cfg.num_silk {
            let id = SilkId::new(i as u16);
            let mut record = SilkRecord::new(id);
            let (stack_base, stack_size) = arena.slot_of(id);
            unsafe {
                record.ctx.init(trampoline, stack_base, stack_size);
            }
            records.push(record);
        }
        let queue_capacity = cfg.queue_capacity;
        let num_silk = cfg.num_silk;

        let inner = Arc::new(EngineInner {
            config: cfg,
            arena,
            records: Mutex::new(records),
            free_list: Mutex::new(FreeList::default()),
            queue: MessageQueue::new(queue_capacity),
            boot_done: Mutex::new(false),
            boot_count: Mutex::new(0),
            boot_cv: Condvar::new(),
            worker: Mutex::new(None),
        });

        // Silk 0 is switched into directly by `worker_main`; every other
        // silk is brought up to FREE by dequeuing one `Boot` message each,
        // chained through the same dispatch loop that handles ordinary
        // traffic. These are the first messages ever enqueued, so the
        // worker drains all of them before any application code can run.
        for i in 1..num_silk {
            let id = SilkId::new(i as u16);
            let raw = RawMessage::from_message(Message::new(id, MsgCode::Boot), 0);
            inner
                .queue
                .send(raw)
                .expect("queue_capacity must exceed num_silk - 1 to hold the boot messages");
        }

        let worker_inner = inner.clone();
        let handle = std::thread::Builder::new()
            .name("silk-worker".into())
            .spawn(move || worker_main(worker_inner))
            .map_err(EngineError::ThreadCreateFailed)?;
        *inner.worker.lock().unwrap() = Some(handle);

        let mut done = inner.boot_done.lock().unwrap();
        while !*done {
            done = inner.boot_cv.wait(done).unwrap();
        }
        drop(done);

        log::info!("engine booted with {} silks", inner.config.num_silk);
        Ok(Self { inner })
    }

    /// Reserves a FREE silk and installs its entry point. The silk does
    /// not begin running until [`Engine::dispatch`] is called with the
    /// returned reference.
    pub fn alloc(&self, entry: EntryFn, arg: *mut ()) -> Result<SilkRef, AllocError> {
        let id = self.inner.free_list.lock().unwrap().pop(&mut self.inner.records.lock().unwrap());
        let id = match id {
            Some(id) => id,
            None => return Err(AllocError::NoFreeSilk),
        };
        let mut records = self.inner.records.lock().unwrap();
        let record = &mut records[id.index()];
        debug_assert!(matches!(record.state, SilkState::Free));
        record.state = SilkState::Alloc;
        record.entry = Some((entry, arg));
        Ok(record.silk_ref())
    }

    /// Enqueues the `Start` message that begins running an allocated silk.
    pub fn dispatch(&self, target: SilkRef) -> Result<(), EngineOpError> {
        self.send_raw(target, MsgCode::Start, std::ptr::null_mut())
    }

    /// Sends an application-defined (or reserved) message to `target`.
    /// Delivery is asynchronous: this only enqueues.
    pub fn send(&self, target: SilkRef, code: MsgCode, ctx: *mut ()) -> Result<(), EngineOpError> {
        self.send_raw(target, code, ctx)
    }

    /// Sends `code` to whichever silk currently occupies `target`, without
    /// requiring the caller to hold a [`SilkRef`] — the generation is
    /// looked up live at send time instead of being pinned by the caller.
    /// A message built this way can only ever be stale by the time it
    /// reaches the front of the queue, never by the time it is sent.
    pub fn send_code(&self, target: SilkId, code: MsgCode) -> Result<(), EngineOpError> {
        let generation = self.inner.records.lock().unwrap()[target.index()].generation;
        self.send_raw(SilkRef::for_id(target, generation), code, std::ptr::null_mut())
    }

    fn send_raw(&self, target: SilkRef, code: MsgCode, ctx: *mut ()) -> Result<(), EngineOpError> {
        let msg = Message::with_ctx(target.id, code, ctx);
        let raw = RawMessage::from_message(msg, target.generation);
        self.inner.queue.send(raw)?;
        Ok(())
    }

    /// Asynchronously kills `target`. A silk killed this way never runs its
    /// remaining frames' destructors: the engine abandons its stack and
    /// rebuilds a fresh boot context for reuse, it does not unwind it.
    pub fn kill(&self, target: SilkRef) -> Result<(), EngineOpError> {
        self.send_raw(target, MsgCode::Term, std::ptr::null_mut())
    }

    /// Number of silks currently on the free list.
    pub fn free_count(&self) -> u32 {
        self.inner.free_list.lock().unwrap().len()
    }

    /// Signals the worker thread to exit after draining the queue, without
    /// waiting for it. Use [`Engine::join`] to actually wait; this is for
    /// callers (e.g. a signal handler) that cannot block.
    pub fn terminate(&self) {
        self.inner
            .queue
            .send(RawMessage::from_message(
                Message::new(SilkId::new(0), MsgCode::TermThread),
                0,
            ))
            .ok();
    }

    /// Signals the worker thread to exit after draining the queue, then
    /// joins it and releases the stack arena. `self` is consumed: the
    /// engine cannot be restarted.
    ///
    /// The arena is only released here, never in `Drop`, if this is the
    /// last `Engine` handle: releasing requires a fallible `munmap`, and
    /// `Drop` has no way to propagate that failure to a caller.
    pub fn join(self) -> Result<(), EngineError> {
        self.terminate();
        let handle = self.inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| EngineError::ThreadError)?;
        }
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner.arena.release(),
            Err(_) => Ok(()),
        }
    }
}

/// Entry point every silk stack is initialized to run.
///
/// Identifies itself by dividing a stack-local address by the arena's slot
/// stride, then loops: becomes FREE, waits to be handed a message, runs its
/// entry function to completion, and recycles itself.
unsafe extern "C" fn trampoline() -> ! {
    let marker: u8 = 0;
    let inner = tls::engine().expect("trampoline running without a bound engine");
    let id = inner.arena.id_of(&marker as *const u8 as usize);
    tls::set_current(id);

    loop {
        mark_free(&inner, id);
        let msg = pump(&inner, id);
        match msg.code {
            MsgCode::Start => {
                let (entry, arg) = {
                    let mut records = inner.records.lock().unwrap();
                    let record = &mut records[id.index()];
                    record.state = SilkState::Run;
                    record.entry.take().expect("Start dispatched without an entry")
                };
                entry(arg);
                recycle_after_return(&inner, id);
            }
            // Anything else (a Term, or an application message addressed
            // to a silk that has not yet started) is intercepted by `pump`
            // before it is ever handed back here — Term recycles without
            // resuming the silk at all, and `pump` never hands anything
            // but `Start` to a silk sitting in `Alloc`.
            other => {
                log::warn!("silk {id} woke to unexpected message {other:?}");
            }
        }
    }
}

/// Transitions `id` to FREE and returns it to the pool. Called both for a
/// freshly-booted silk and for one that just finished running. The first
/// transition out of `SilkState::Boot` a silk ever makes also counts
/// towards [`Engine::init`]'s boot-completion wait.
fn mark_free(inner: &EngineInner, id: SilkId) {
    let mut records = inner.records.lock().unwrap();
    let was_boot = matches!(records[id.index()].state, SilkState::Boot);
    records[id.index()].state = SilkState::Free;
    drop(records);
    inner
        .free_list
        .lock()
        .unwrap()
        .push(&mut inner.records.lock().unwrap(), id);

    if was_boot {
        let mut count = inner.boot_count.lock().unwrap();
        *count += 1;
        if *count == inner.config.num_silk {
            *inner.boot_done.lock().unwrap() = true;
            inner.boot_cv.notify_all();
        }
    }
}

/// Natural termination: the entry function returned on its own stack, no
/// nested frames to discard. The trampoline's own loop continues straight
/// on to its next `pump`, so no context rebuild is needed here — the very
/// next voluntary switch captures the correct resume point.
fn recycle_after_return(inner: &EngineInner, id: SilkId) {
    let mut records = inner.records.lock().unwrap();
    let record = &mut records[id.index()];
    record.state = SilkState::Term;
    record.generation = record.generation.wrapping_add(1);
    record.entry = None;
}

/// Rebuilds `id`'s context back to a fresh trampoline entry, abandoning
/// whatever frames it was suspended in. Used when a silk is killed while
/// not currently resident — an Alloc silk that never started, or a Run
/// silk parked inside [`crate::silk_yield`] at arbitrary call depth.
fn recycle_stale(inner: &EngineInner, id: SilkId) {
    let mut records = inner.records.lock().unwrap();
    let (stack_base, stack_size) = inner.arena.slot_of(id);
    let record = &mut records[id.index()];
    unsafe {
        record.ctx.init(trampoline, stack_base, stack_size);
    }
    record.state = SilkState::Free;
    record.generation = record.generation.wrapping_add(1);
    record.entry = None;
    record.pending_msg = None;
    drop(records);
    inner
        .free_list
        .lock()
        .unwrap()
        .push(&mut inner.records.lock().unwrap(), id);
}

/// Kills the calling silk from inside its own entry function, at whatever
/// call depth. Never returns: per the spec's own description, this works
/// by enqueuing a `Term` addressed to itself, then repeatedly pumping the
/// scheduler (discarding anything else addressed to it in the meantime)
/// until that `Term` reaches the front and `pump` performs the discard
/// switch that recycles it.
pub(crate) fn kill_self(inner: &EngineInner, id: SilkId) -> ! {
    let generation = inner.records.lock().unwrap()[id.index()].generation;
    let raw = RawMessage::from_message(Message::new(id, MsgCode::Term), generation);
    if let Err(err) = inner.queue.send(raw) {
        log::error!("silk_kill_self({id}): failed to enqueue our own Term: {err}");
    }
    loop {
        let _ = pump(inner, id);
    }
}

/// Kills `id` as addressed by a currently-running silk. If `id` names the
/// calling silk itself, this is a self-kill (never returns); otherwise it
/// is equivalent to [`Engine::kill`], addressed with the target's current
/// generation looked up live rather than one the caller already held.
pub(crate) fn kill_by_id(inner: &EngineInner, caller: SilkId, id: SilkId) {
    if id == caller {
        kill_self(inner, id);
    }
    let generation = inner.records.lock().unwrap()[id.index()].generation;
    let msg = Message::new(id, MsgCode::Term);
    let raw = RawMessage::from_message(msg, generation);
    if let Err(err) = inner.queue.send(raw) {
        log::warn!("silk_kill_by_id({id}): {err}");
    }
}

/// How often the pump loop re-checks the queue while idle and an `idle_cb`
/// is configured.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The single unified scheduling primitive: dequeues and dispatches
/// messages — handling `Term` recycling, self-kill draining and the idle
/// callback along the way — until one addressed to `id` itself is ready,
/// then returns it.
///
/// Runs wherever the calling silk's own stack happens to be: the
/// trampoline's own loop calls it directly, and [`crate::silk_yield`]
/// calls it from arbitrary call depth inside a running entry function.
/// Every switch this performs goes straight from `id`'s context to the
/// target's — the worker's home/kernel context is never touched here, only
/// at the very first switch into silk 0 (in `worker_main`) and the very
/// last switch back out on `TermThread` (below).
fn pump(inner: &EngineInner, id: SilkId) -> Message {
    loop {
        if let Some(raw) = inner.records.lock().unwrap()[id.index()].pending_msg.take() {
            return raw.to_message();
        }

        let raw = match &inner.config.idle_cb {
            Some(idle_cb) => match inner.queue.recv_timeout(IDLE_POLL_INTERVAL) {
                Some(raw) => raw,
                None => {
                    let exec_thread = tls::ExecutionThread::new(inner.config.ctx);
                    idle_cb(&exec_thread);
                    continue;
                }
            },
            None => inner.queue.recv_blocking(),
        };

        if matches!(MsgCode::from_raw(raw.code_raw), MsgCode::TermThread) {
            log::debug!("worker thread received TermThread, exiting");
            let home = tls::home_ctx();
            let ctx_ptr = {
                let mut records = inner.records.lock().unwrap();
                &mut records[id.index()].ctx as *mut silk_cpu::TaskContext
            };
            tls::clear_current();
            unsafe {
                (*ctx_ptr).switch_to(&*home);
            }
            unreachable!("worker switched back into a dead silk's context after TermThread");
        }

        let target = raw.target;
        let current_generation = inner.records.lock().unwrap()[target.index()].generation;
        if raw.generation != current_generation {
            log::trace!(
                "dropping stale message for {target} (gen {} != {})",
                raw.generation,
                current_generation
            );
            continue;
        }

        let code = MsgCode::from_raw(raw.code_raw);
        let state = inner.records.lock().unwrap()[target.index()].state;

        if matches!(code, MsgCode::Term) {
            match state {
                SilkState::Alloc | SilkState::Run if target == id => {
                    // Self-kill reaching the front: discard the current
                    // frames by rebuilding a fresh context for this slot,
                    // then switch away through a throwaway context so the
                    // freshly-rebuilt one is never clobbered by the
                    // outgoing register save.
                    recycle_stale(inner, id);
                    let ctx_ptr = {
                        let mut records = inner.records.lock().unwrap();
                        &mut records[id.index()].ctx as *mut silk_cpu::TaskContext
                    };
                    let mut discard = silk_cpu::TaskContext::new();
                    tls::clear_current();
                    unsafe {
                        discard.switch_to(&*ctx_ptr);
                    }
                    unreachable!("worker switched back into a dead silk's discarded context");
                }
                SilkState::Alloc | SilkState::Run => recycle_stale(inner, target),
                _ => log::trace!("ignoring Term for {target} in state {state:?}"),
            }
            continue;
        }

        match state {
            SilkState::Boot if target != id => {
                let ctx_ptr = {
                    let mut records = inner.records.lock().unwrap();
                    &mut records[target.index()].ctx as *mut silk_cpu::TaskContext
                };
                switch_to_target(inner, id, ctx_ptr);
            }
            SilkState::Alloc | SilkState::Run if target == id => {
                // Addressed to the silk that is itself driving this pump
                // call: stash it and loop back to the top check, which
                // picks it up without performing a switch.
                inner.records.lock().unwrap()[id.index()].pending_msg = Some(raw);
            }
            SilkState::Alloc | SilkState::Run => {
                let ctx_ptr = {
                    let mut records = inner.records.lock().unwrap();
                    records[target.index()].pending_msg = Some(raw);
                    &mut records[target.index()].ctx as *mut silk_cpu::TaskContext
                };
                switch_to_target(inner, id, ctx_ptr);
            }
            other => {
                log::trace!("dropping message for {target} in non-receiving state {other:?}");
            }
        }
    }
}

/// Switches directly from `from`'s context to `*to_ctx`, and resumes
/// bookkeeping once some later switch lands back on `from`.
fn switch_to_target(inner: &EngineInner, from: SilkId, to_ctx: *mut silk_cpu::TaskContext) {
    let from_ctx = {
        let mut records = inner.records.lock().unwrap();
        &mut records[from.index()].ctx as *mut silk_cpu::TaskContext
    };
    tls::clear_current();
    unsafe {
        (*from_ctx).switch_to(&*to_ctx);
    }
    tls::set_current(from);
}

/// Suspends the calling silk by running the scheduler from wherever it is
/// currently parked, returning whatever message a later dispatch delivers
/// to it. Must only be called from the silk's own stack.
pub(crate) fn yield_now(inner: &EngineInner, id: SilkId) -> Message {
    pump(inner, id)
}

fn worker_main(inner: Arc<EngineInner>) {
    tls::bind_engine(inner.clone());

    // The only switch that ever touches the worker's own kernel stack on
    // the way in. From here on, control stays on silk stacks exclusively
    // — `pump` chains directly from silk to silk, booting 1..num_silk via
    // their queued `Boot` messages and then dispatching ordinary traffic
    // — until a `TermThread` message switches back to `home` inside `pump`.
    let first_ctx = {
        let mut records = inner.records.lock().unwrap();
        &mut records[0].ctx as *mut silk_cpu::TaskContext
    };
    let home = tls::home_ctx();
    unsafe {
        (*home).switch_to(&*first_ctx);
    }

    tls::unbind_engine();
}
