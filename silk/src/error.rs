use thiserror::Error;

/// Failure from [`crate::Engine::init`] or [`crate::Engine::join`].
///
/// Any of these mean the `Engine` handle is no longer usable: `init` never
/// produced one, or `join` has already consumed it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("num_stack_pages must be at least 1")]
    InvalidStackSize,
    #[error("num_silk must be at least {min}")]
    InvalidNumSilk { min: u32 },
    #[error("failed to spawn the worker thread: {0}")]
    ThreadCreateFailed(#[source] std::io::Error),
    #[error("worker thread did not terminate cleanly")]
    ThreadError,
    #[error("failed to map the stack arena: {0}")]
    StackAllocFailed(#[source] std::io::Error),
    #[error("failed to unmap the stack arena: {0}")]
    StackFreeFailed(#[source] std::io::Error),
    #[error("failed to set stack protection on slot {slot}: {source}")]
    StackProtectionFailed { slot: u32, #[source] source: std::io::Error },
}

/// Resource-exhaustion failure from [`crate::Engine::alloc`].
///
/// Recoverable: the caller decides whether to retry, once some silk has
/// been released back to the free pool.
#[derive(Debug, Error)]
pub enum AllocError {
    #[error("no free silk available")]
    NoFreeSilk,
}

/// Resource-exhaustion failure from [`crate::Engine::send`] /
/// [`crate::Engine::send_code`].
///
/// Recoverable: producers are responsible for their own backpressure: the
/// queue never blocks and never retries on the caller's behalf.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("message queue is full")]
    QueueFull,
}

/// Failure from [`crate::Engine::dispatch`] / [`crate::Engine::kill`].
#[derive(Debug, Error)]
pub enum EngineOpError {
    #[error(transparent)]
    Queue(#[from] QueueError),
}
