use std::io;
use std::ptr;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::record::SilkId;

/// Page size assumed throughout the arena layout, matching the original
/// library's fixed `PAGE_SIZE` (4 KiB); it does not query
/// `sysconf(_SC_PAGESIZE)` because the slot arithmetic must stay a simple,
/// predictable multiple for `id_of` to invert `slot_of` by plain division.
pub const PAGE_SIZE: usize = 4 * 1024;

static_assertions::const_assert!(PAGE_SIZE.is_power_of_two());

/// One contiguous anonymous mapping holding `num_silk` fixed-size slots,
/// each `P_use` usable pages followed by `P_guard` unmapped guard pages.
///
/// Guard pages turn stack overflow into a fault instead of silent
/// corruption of the neighboring silk's stack. The mapping is released when
/// the arena is dropped.
pub(crate) struct StackArena {
    base: *mut u8,
    /// Total mapped length, `num_silk * slot_size`.
    total_len: usize,
    /// Usable + guard pages, in bytes — the stride between silk slots.
    slot_size: usize,
    /// Usable bytes at the head of each slot.
    usable_size: usize,
    num_silk: u32,
}

unsafe impl Send for StackArena {}
unsafe impl Sync for StackArena {}

impl StackArena {
    /// Maps the arena and grants read/write access to each slot's usable
    /// pages, leaving its guard pages `PROT_NONE`.
    pub fn map(cfg: &EngineConfig) -> Result<Self, EngineError> {
        let usable_size = cfg.num_stack_pages as usize * PAGE_SIZE;
        let slot_size =
            (cfg.num_stack_pages + cfg.num_stack_separator_pages) as usize * PAGE_SIZE;
        let total_len = slot_size * cfg.num_silk as usize;

        let mut mem_flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        cfg_if::cfg_if! {
            if #[cfg(target_os = "linux")] {
                mem_flags |= libc::MAP_STACK;
                if cfg.lock_stack_mem {
                    mem_flags |= libc::MAP_LOCKED;
                }
            }
        }
        let requested_addr = cfg.stack_addr.unwrap_or(ptr::null_mut());
        if cfg.stack_addr.is_some() {
            mem_flags |= libc::MAP_FIXED;
        }

        // Memory starts out entirely inaccessible; each slot's usable pages
        // are opened up individually below so guard pages never become
        // readable/writable by accident.
        let base = unsafe {
            libc::mmap(
                requested_addr as *mut libc::c_void,
                total_len,
                libc::PROT_NONE,
                mem_flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(EngineError::StackAllocFailed(io::Error::last_os_error()));
        }
        let base = base as *mut u8;

        for i in 0..cfg.num_silk {
            let slot_base = unsafe { base.add(i as usize * slot_size) };
            let rc = unsafe {
                libc::mprotect(
                    slot_base as *mut libc::c_void,
                    usable_size,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if rc != 0 {
                let err = io::Error::last_os_error();
                unsafe {
                    libc::munmap(base as *mut libc::c_void, total_len);
                }
                return Err(EngineError::StackProtectionFailed { slot: i, source: err });
            }
            if cfg.lock_stack_mem {
                unsafe {
                    libc::mlock(slot_base as *const libc::c_void, usable_size);
                }
            }
        }

        Ok(Self { base, total_len, slot_size, usable_size, num_silk: cfg.num_silk })
    }

    /// The usable stack region `[base, base + P_use*page_size)` for `id`.
    pub fn slot_of(&self, id: SilkId) -> (*mut u8, usize) {
        debug_assert!(id.index() < self.num_silk as usize);
        let slot_base = unsafe { self.base.add(id.index() * self.slot_size) };
        (slot_base, self.usable_size)
    }

    /// Recovers the silk id owning the page containing `stack_addr`.
    ///
    /// This is how a running silk identifies itself: it takes the address
    /// of a local variable and divides by the slot stride. No TLS is
    /// involved, so this works regardless of which stack the worker is
    /// currently executing on.
    pub fn id_of(&self, stack_addr: usize) -> SilkId {
        let base = self.base as usize;
        debug_assert!(stack_addr >= base && stack_addr < base + self.total_len);
        let offset = stack_addr - base;
        SilkId::new((offset / self.slot_size) as u16)
    }

    /// Unmaps the arena, surfacing a failed `munmap` as an error instead of
    /// only logging it. Consumes `self` and suppresses the best-effort
    /// `Drop` impl, which stays in place for callers that drop the arena
    /// without ever calling this (e.g. because the engine was abandoned
    /// mid-run rather than joined).
    pub fn release(self) -> Result<(), EngineError> {
        let rc = unsafe { libc::munmap(self.base as *mut libc::c_void, self.total_len) };
        let err = io::Error::last_os_error();
        std::mem::forget(self);
        if rc != 0 {
            return Err(EngineError::StackFreeFailed(err));
        }
        Ok(())
    }
}

impl Drop for StackArena {
    fn drop(&mut self) {
        let rc = unsafe { libc::munmap(self.base as *mut libc::c_void, self.total_len) };
        if rc != 0 {
            log::error!("failed to unmap stack arena: {}", io::Error::last_os_error());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn slot_and_id_roundtrip() {
        let cfg = EngineConfig::builder()
            .num_silk(4)
            .num_stack_pages(4)
            .num_stack_separator_pages(1)
            .build()
            .unwrap();
        let arena = StackArena::map(&cfg).unwrap();
        for i in 0..4u16 {
            let id = SilkId::new(i);
            let (slot_base, usable) = arena.slot_of(id);
            assert_eq!(usable, 4 * PAGE_SIZE);
            let recovered = arena.id_of(slot_base as usize);
            assert_eq!(recovered, id);
            let recovered_mid = arena.id_of(slot_base as usize + usable / 2);
            assert_eq!(recovered_mid, id);
        }
    }
}
