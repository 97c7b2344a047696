//! Killing a silk that was allocated but never dispatched must recycle it
//! without ever invoking its entry function.

use std::time::Duration;

use silk::{Engine, EngineConfig};

fn never_runs(_arg: *mut ()) {
    panic!("a silk killed before dispatch must never run its entry function");
}

#[test]
fn killing_an_alloc_silk_prevents_it_running() {
    let engine = Engine::init(EngineConfig::builder().num_silk(4).build().unwrap()).unwrap();
    assert_eq!(engine.free_count(), 4);

    let silk = engine.alloc(never_runs, std::ptr::null_mut()).unwrap();
    assert_eq!(engine.free_count(), 3);

    engine.kill(silk).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(engine.free_count(), 4);
    engine.join().unwrap();
}
