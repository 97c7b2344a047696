//! `silk_kill_self` must never return to its caller, however deep in the
//! call stack it is invoked from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use silk::{Engine, EngineConfig};

static REACHED_AFTER_KILL: AtomicBool = AtomicBool::new(false);

fn nested_three_deep() {
    silk::silk_kill_self();
}

fn nested_two_deep() {
    nested_three_deep();
    REACHED_AFTER_KILL.store(true, Ordering::SeqCst);
}

fn suicide(_arg: *mut ()) {
    nested_two_deep();
    REACHED_AFTER_KILL.store(true, Ordering::SeqCst);
}

#[test]
fn kill_self_never_returns_to_any_caller() {
    let engine = Engine::init(EngineConfig::builder().num_silk(4).build().unwrap()).unwrap();
    let silk = engine.alloc(suicide, std::ptr::null_mut()).unwrap();
    engine.dispatch(silk).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert!(!REACHED_AFTER_KILL.load(Ordering::SeqCst));
    assert_eq!(engine.free_count(), 4);
    engine.join().unwrap();
}
