/// A dense, unique identifier for a silk: `0..N-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SilkId(pub(crate) u16);

impl SilkId {
    pub fn new(id: u16) -> Self {
        Self(id)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn raw(self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for SilkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "silk#{}", self.0)
    }
}

/// A reference to an allocated silk, returned by [`crate::Engine::alloc`].
///
/// Carries the id and the generation the silk had at allocation time, so a
/// stale `SilkRef` held past a kill-and-recycle cycle is distinguishable
/// from the silk currently occupying that id (see `SPEC_FULL.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilkRef {
    pub(crate) id: SilkId,
    pub(crate) generation: u32,
}

impl SilkRef {
    pub(crate) fn for_id(id: SilkId, generation: u32) -> Self {
        Self { id, generation }
    }

    pub fn id(&self) -> SilkId {
        self.id
    }
}

/// `BOOT → FREE → ALLOC → RUN → TERM → FREE`, exactly as specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilkState {
    /// Initial state; the silk has never executed up to its yield loop.
    Boot,
    /// On the free list, available to [`crate::Engine::alloc`].
    Free,
    /// Reserved by `alloc`, entry/arg installed, not yet running.
    Alloc,
    /// The entry function has been invoked; may be executing or yielded.
    Run,
    /// Asynchronously marked for death; queued messages targeting it are
    /// dropped until it is recycled.
    Term,
}

/// The user entry point invoked when a silk transitions ALLOC → RUN.
///
/// Ordinary Rust calling convention — this runs on the silk's own stack,
/// called from inside the trampoline loop after a context switch has
/// already landed there, not through any special ABI.
pub type EntryFn = fn(arg: *mut ());

pub(crate) struct SilkRecord {
    pub id: SilkId,
    pub state: SilkState,
    pub generation: u32,
    pub entry: Option<(EntryFn, *mut ())>,
    pub ctx: silk_cpu::TaskContext,
    /// Set by the dispatcher just before switching in (or, for a message
    /// addressed to whichever silk is itself driving the dispatch loop,
    /// without a switch at all), read back at the top of that silk's next
    /// `pump` call.
    pub pending_msg: Option<crate::msg::RawMessage>,
    pub next_free: Option<SilkId>,
}

impl SilkRecord {
    pub fn new(id: SilkId) -> Self {
        Self {
            id,
            state: SilkState::Boot,
            generation: 0,
            entry: None,
            ctx: silk_cpu::TaskContext::new(),
            pending_msg: None,
            next_free: None,
        }
    }

    pub fn silk_ref(&self) -> SilkRef {
        SilkRef { id: self.id, generation: self.generation }
    }
}

unsafe impl Send for SilkRecord {}

/// A singly-linked LIFO of FREE records, intrusive over `SilkRecord::next_free`.
///
/// LIFO deliberately: a recently-freed silk's stack pages are cache- and
/// TLB-hot, so reusing it first is cheaper than round-robining through the
/// whole pool.
#[derive(Default)]
pub(crate) struct FreeList {
    head: Option<SilkId>,
    len: u32,
}

impl FreeList {
    pub fn push(&mut self, records: &mut [SilkRecord], id: SilkId) {
        records[id.index()].next_free = self.head;
        self.head = Some(id);
        self.len += 1;
    }

    pub fn pop(&mut self, records: &mut [SilkRecord]) -> Option<SilkId> {
        let id = self.head?;
        self.head = records[id.index()].next_free;
        records[id.index()].next_free = None;
        self.len -= 1;
        Some(id)
    }

    pub fn len(&self) -> u32 {
        self.len
    }
}
