use std::sync::Arc;

use crate::error::EngineError;
use crate::queue::DEFAULT_CAPACITY;
use crate::tls::ExecutionThread;

/// Smallest pool size `Engine::init` accepts: one silk booting leaves zero
/// spares, so at least two are required for `alloc` to ever succeed.
pub const MIN_NUM_SILK: u32 = 2;

/// Called on the worker thread whenever the message queue runs dry, so an
/// application can do periodic work (socket polling, timers) between
/// silks without needing a silk of its own.
pub type IdleCallback = Arc<dyn Fn(&ExecutionThread) + Send + Sync>;

/// Construction-time parameters for an [`crate::Engine`].
///
/// Build one with [`EngineConfig::builder`]; unset fields take the defaults
/// documented on each setter.
#[derive(Clone)]
pub struct EngineConfig {
    pub(crate) num_silk: u32,
    pub(crate) num_stack_pages: u32,
    pub(crate) num_stack_separator_pages: u32,
    pub(crate) stack_addr: Option<*mut u8>,
    pub(crate) lock_stack_mem: bool,
    pub(crate) queue_capacity: u32,
    pub(crate) idle_cb: Option<IdleCallback>,
    pub(crate) ctx: *mut (),
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("num_silk", &self.num_silk)
            .field("num_stack_pages", &self.num_stack_pages)
            .field("num_stack_separator_pages", &self.num_stack_separator_pages)
            .field("stack_addr", &self.stack_addr)
            .field("lock_stack_mem", &self.lock_stack_mem)
            .field("queue_capacity", &self.queue_capacity)
            .field("idle_cb", &self.idle_cb.as_ref().map(|_| "<fn>"))
            .field("ctx", &self.ctx)
            .finish()
    }
}

unsafe impl Send for EngineConfig {}
unsafe impl Sync for EngineConfig {}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn num_silk(&self) -> u32 {
        self.num_silk
    }
}

/// Builder for [`EngineConfig`]; validation happens in [`Self::build`].
pub struct EngineConfigBuilder {
    num_silk: u32,
    num_stack_pages: u32,
    num_stack_separator_pages: u32,
    stack_addr: Option<*mut u8>,
    lock_stack_mem: bool,
    queue_capacity: u32,
    idle_cb: Option<IdleCallback>,
    ctx: *mut (),
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            num_silk: 64,
            num_stack_pages: 16,
            num_stack_separator_pages: 1,
            stack_addr: None,
            lock_stack_mem: false,
            queue_capacity: DEFAULT_CAPACITY,
            idle_cb: None,
            ctx: std::ptr::null_mut(),
        }
    }
}

impl EngineConfigBuilder {
    /// Size of the silk pool. Must be at least [`MIN_NUM_SILK`].
    pub fn num_silk(mut self, n: u32) -> Self {
        self.num_silk = n;
        self
    }

    /// Usable pages per stack (`P_use`). Must be at least 1.
    pub fn num_stack_pages(mut self, n: u32) -> Self {
        self.num_stack_pages = n;
        self
    }

    /// Guard pages between adjacent stacks (`P_guard`), left unmapped.
    pub fn num_stack_separator_pages(mut self, n: u32) -> Self {
        self.num_stack_separator_pages = n;
        self
    }

    /// Requests the arena be mapped at a fixed address instead of one the
    /// kernel chooses. Rarely needed outside of deterministic tests.
    pub fn stack_addr(mut self, addr: *mut u8) -> Self {
        self.stack_addr = Some(addr);
        self
    }

    /// Whether to `mlock` each slot's usable pages after mapping, keeping
    /// them resident and off the swap path.
    pub fn lock_stack_mem(mut self, lock: bool) -> Self {
        self.lock_stack_mem = lock;
        self
    }

    /// Message queue capacity; must be a power of two.
    pub fn queue_capacity(mut self, n: u32) -> Self {
        self.queue_capacity = n;
        self
    }

    /// Invoked on the worker thread when the message queue runs dry.
    pub fn idle_cb<F>(mut self, cb: F) -> Self
    where
        F: Fn(&ExecutionThread) + Send + Sync + 'static,
    {
        self.idle_cb = Some(Arc::new(cb));
        self
    }

    /// Opaque user pointer threaded through to the idle callback via
    /// `ExecutionThread::ctx`. Never dereferenced by the engine itself.
    pub fn ctx(mut self, ctx: *mut ()) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn build(self) -> Result<EngineConfig, EngineError> {
        if self.num_silk < MIN_NUM_SILK {
            return Err(EngineError::InvalidNumSilk { min: MIN_NUM_SILK });
        }
        if self.num_stack_pages == 0 {
            return Err(EngineError::InvalidStackSize);
        }
        if !self.queue_capacity.is_power_of_two() {
            return Err(EngineError::InvalidStackSize);
        }
        Ok(EngineConfig {
            num_silk: self.num_silk,
            num_stack_pages: self.num_stack_pages,
            num_stack_separator_pages: self.num_stack_separator_pages,
            stack_addr: self.stack_addr,
            lock_stack_mem: self.lock_stack_mem,
            queue_capacity: self.queue_capacity,
            idle_cb: self.idle_cb,
            ctx: self.ctx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_too_few_silk() {
        let err = EngineConfig::builder().num_silk(1).build().unwrap_err();
        assert!(matches!(err, EngineError::InvalidNumSilk { min: MIN_NUM_SILK }));
    }

    #[test]
    fn rejects_non_power_of_two_queue() {
        let err = EngineConfig::builder().queue_capacity(100).build().unwrap_err();
        assert!(matches!(err, EngineError::InvalidStackSize));
    }

    #[test]
    fn defaults_build_ok() {
        assert!(EngineConfig::builder().build().is_ok());
    }
}
