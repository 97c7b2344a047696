//! Repeatedly allocating, running, and retiring the same slot must keep
//! reusing the identical stack region — the whole point of a fixed arena
//! of slots instead of allocating a fresh stack per silk — and a deep
//! recursive call within one of those runs must not reach the guard page.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use silk::{Engine, EngineConfig};

/// Deep enough that an accidentally-shallow or tail-call-eliminated
/// recursion would be obvious from `START_ADDR - BOTTOM_ADDR` coming out
/// far smaller than expected, but shallow enough to stay well inside the
/// default 16-page (64 KiB) stack.
const RECURSION_DEPTH: u32 = 50;
/// Deliberately conservative: real frames (locals, saved registers, the
/// `black_box` barrier) use more than this per level, so clearing this
/// bound does not depend on exact codegen.
const FRAME_SIZE_LOWER_BOUND: usize = 64;

static LAST_ADDR: AtomicUsize = AtomicUsize::new(0);
static MISMATCHES: AtomicUsize = AtomicUsize::new(0);
static START_ADDR: AtomicUsize = AtomicUsize::new(0);
static BOTTOM_ADDR: AtomicUsize = AtomicUsize::new(0);

/// Recurses `depth` times, keeping a real per-frame stack footprint alive
/// (not optimized away) via `std::hint::black_box`, and returns the
/// address of the deepest frame's local.
fn recurse(depth: u32) -> usize {
    let frame = [0u8; 256];
    std::hint::black_box(&frame);
    if depth == 0 {
        &frame as *const u8 as usize
    } else {
        recurse(depth - 1)
    }
}

fn record_and_exit(_arg: *mut ()) {
    let local = 0u8;
    let addr = &local as *const u8 as usize;
    let prev = LAST_ADDR.swap(addr, Ordering::SeqCst);
    if prev != 0 && prev != addr {
        MISMATCHES.fetch_add(1, Ordering::SeqCst);
    }

    START_ADDR.store(addr, Ordering::SeqCst);
    BOTTOM_ADDR.store(recurse(RECURSION_DEPTH), Ordering::SeqCst);
}

#[test]
fn recycled_slot_reuses_the_same_stack_region() {
    // Only one silk is ever allocated at a time out of a pool of two, so
    // the LIFO free list hands back the same slot every cycle.
    let engine = Engine::init(EngineConfig::builder().num_silk(2).build().unwrap()).unwrap();

    for _ in 0..10 {
        let silk = engine.alloc(record_and_exit, std::ptr::null_mut()).unwrap();
        engine.dispatch(silk).unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    assert_eq!(MISMATCHES.load(Ordering::SeqCst), 0);

    // The recursion in the last run completed (the silk returned and was
    // recycled normally instead of faulting), and consumed at least the
    // expected lower bound of stack — proof the guard page was not hit.
    let start = START_ADDR.load(Ordering::SeqCst);
    let bottom = BOTTOM_ADDR.load(Ordering::SeqCst);
    assert!(start > bottom, "stack expected to grow downward");
    assert!(
        start - bottom >= RECURSION_DEPTH as usize * FRAME_SIZE_LOWER_BOUND,
        "recursion depth {RECURSION_DEPTH} did not consume the expected stack range: \
         start={start:#x} bottom={bottom:#x}"
    );

    engine.join().unwrap();
}
