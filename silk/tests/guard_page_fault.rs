//! A silk that recurses past its usable stack must fault into its guard
//! page rather than silently corrupt its neighbor's stack.
//!
//! This can only be observed by catching the fatal signal in a child
//! process, so it runs out-of-process via `fork`. Ignored by default: it
//! deliberately crashes a process and some sandboxes restrict `fork`/signal
//! delivery, which would make the test itself unreliable rather than the
//! code it exercises.

use std::time::Duration;

use silk::{Engine, EngineConfig};

fn blow_the_stack(_arg: *mut ()) {
    fn recurse(depth: u64) -> u64 {
        let padding = [depth; 64];
        1 + recurse(depth + 1) + padding[0] % 1
    }
    recurse(0);
}

#[test]
#[ignore]
fn overflowing_a_stack_faults_instead_of_corrupting_a_neighbor() {
    let pid = unsafe { libc::fork() };
    assert!(pid >= 0, "fork failed");

    if pid == 0 {
        let engine = Engine::init(EngineConfig::builder().num_silk(2).num_stack_pages(4).build().unwrap())
            .expect("engine init");
        let silk = engine.alloc(blow_the_stack, std::ptr::null_mut()).unwrap();
        engine.dispatch(silk).unwrap();
        std::thread::sleep(Duration::from_secs(2));
        // If we get here without the process having been killed by a
        // guard-page fault, the overflow went somewhere it shouldn't have.
        std::process::exit(0);
    }

    let mut status = 0i32;
    unsafe { libc::waitpid(pid, &mut status, 0) };
    let signaled = libc::WIFSIGNALED(status);
    assert!(signaled, "child should have been killed by a guard-page fault, status={status}");
}
