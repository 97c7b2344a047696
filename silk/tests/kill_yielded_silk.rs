//! An external thread killing a silk that is parked in `silk_yield` must
//! recycle it without ever resuming it — the stale-frame hazard this
//! exercises is why `kill` rebuilds the target's context from scratch
//! instead of switching into it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use silk::{Engine, EngineConfig, MsgCode};

static RESUMED: AtomicBool = AtomicBool::new(false);

fn victim(_arg: *mut ()) {
    loop {
        let msg = silk::silk_yield();
        RESUMED.store(true, Ordering::SeqCst);
        if matches!(msg.code, MsgCode::TermThread) {
            return;
        }
    }
}

#[test]
fn killing_a_suspended_silk_recycles_without_resuming_it() {
    let engine = Engine::init(EngineConfig::builder().num_silk(4).build().unwrap()).unwrap();
    let silk = engine.alloc(victim, std::ptr::null_mut()).unwrap();
    engine.dispatch(silk).unwrap();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.free_count(), 3);

    engine.kill(silk).unwrap();
    std::thread::sleep(Duration::from_millis(30));

    assert_eq!(engine.free_count(), 4);
    assert!(!RESUMED.load(Ordering::SeqCst));
    engine.join().unwrap();
}
