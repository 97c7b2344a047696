use crate::record::SilkId;

/// The reserved engine message codes, plus the open range applications may
/// use for their own codes (`App(code)` for `code >= APP_CODE_FIRST`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgCode {
    /// Instructs a freshly-mapped silk to run up to its yield loop and
    /// transition BOOT → FREE.
    Boot,
    /// Instructs an ALLOC silk to begin running its entry function.
    Start,
    /// Asynchronously kills the target silk.
    Term,
    /// Halts the worker thread once popped.
    TermThread,
    /// An application-defined code (`value >= APP_CODE_FIRST`).
    App(u32),
}

/// The first message code an application may use for its own purposes.
pub const APP_CODE_FIRST: u32 = 1000;

impl MsgCode {
    /// Encodes this code as the wire `u32` the original C library would
    /// have stored inline in the message record.
    pub(crate) fn to_raw(self) -> u32 {
        match self {
            MsgCode::Boot => 0,
            MsgCode::Start => 1,
            MsgCode::Term => 2,
            MsgCode::TermThread => 3,
            MsgCode::App(code) => {
                debug_assert!(code >= APP_CODE_FIRST);
                code
            }
        }
    }

    pub(crate) fn from_raw(raw: u32) -> Self {
        match raw {
            0 => MsgCode::Boot,
            1 => MsgCode::Start,
            2 => MsgCode::Term,
            3 => MsgCode::TermThread,
            code => MsgCode::App(code),
        }
    }
}

/// A message addressed to a single silk, carrying an opaque application
/// payload pointer.
///
/// `ctx` is never dereferenced by the engine; it is round-tripped verbatim
/// from sender to the silk that calls [`crate::silk_yield`] and receives it.
#[derive(Debug, Clone, Copy)]
pub struct Message {
    pub target: SilkId,
    pub code: MsgCode,
    pub ctx: *mut (),
}

impl Message {
    pub fn new(target: SilkId, code: MsgCode) -> Self {
        Self { target, code, ctx: std::ptr::null_mut() }
    }

    pub fn with_ctx(target: SilkId, code: MsgCode, ctx: *mut ()) -> Self {
        Self { target, code, ctx }
    }
}

/// The internal, fixed-layout wire shape stored in the ring buffer, plus
/// the generation the sender addressed — see `SPEC_FULL.md` §3 for why a
/// message's generation is checked against the record's at delivery time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawMessage {
    pub target: SilkId,
    pub code_raw: u32,
    pub ctx: usize,
    pub generation: u32,
}

impl RawMessage {
    pub fn zeroed() -> Self {
        Self { target: SilkId::new(0), code_raw: 0, ctx: 0, generation: 0 }
    }

    pub fn from_message(msg: Message, generation: u32) -> Self {
        Self {
            target: msg.target,
            code_raw: msg.code.to_raw(),
            ctx: msg.ctx as usize,
            generation,
        }
    }

    pub fn to_message(self) -> Message {
        Message {
            target: self.target,
            code: MsgCode::from_raw(self.code_raw),
            ctx: self.ctx as *mut (),
        }
    }
}

unsafe impl Send for Message {}
