//! Ring fan-out: over `N` rounds, every silk sends to a different ring
//! neighbor, covering every ordered (sender, receiver) pair including the
//! self pair. Each silk ends up receiving exactly `N` messages, the first
//! of which always comes from its predecessor `(self - 1) mod N`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use silk::{Engine, EngineConfig, MsgCode};

const N: usize = 4;
const PING: u32 = silk::APP_CODE_FIRST;
const NO_ORIGIN: u32 = u32::MAX;

static COUNTS: [AtomicU32; N] =
    [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)];
static FIRST_ORIGIN: [AtomicU32; N] = [
    AtomicU32::new(NO_ORIGIN),
    AtomicU32::new(NO_ORIGIN),
    AtomicU32::new(NO_ORIGIN),
    AtomicU32::new(NO_ORIGIN),
];

fn ring_member(arg: *mut ()) {
    let my_index = arg as usize;
    loop {
        let msg = silk::silk_yield();
        match msg.code {
            MsgCode::App(code) if code == PING => {
                let origin = msg.ctx as usize as u32;
                let _ = FIRST_ORIGIN[my_index].compare_exchange(
                    NO_ORIGIN,
                    origin,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                COUNTS[my_index].fetch_add(1, Ordering::SeqCst);
            }
            MsgCode::TermThread => return,
            _ => {}
        }
    }
}

#[test]
fn ring_fan_out_matches_round_schedule() {
    let engine = Engine::init(EngineConfig::builder().num_silk(N as u32).build().unwrap()).unwrap();

    let mut refs = Vec::with_capacity(N);
    for i in 0..N {
        refs.push(engine.alloc(ring_member, i as *mut ()).unwrap());
    }
    for r in &refs {
        engine.dispatch(*r).unwrap();
    }
    std::thread::sleep(Duration::from_millis(20));

    for r in 0..N {
        for i in 0..N {
            let target = refs[(i + r + 1) % N];
            engine.send(target, MsgCode::App(PING), i as *mut ()).unwrap();
        }
        // Round r's messages must all land (and, by strict FIFO delivery,
        // be processed) before round r+1's begin, so each silk's first
        // arrival is the one from its predecessor.
        std::thread::sleep(Duration::from_millis(20));
    }

    let deadline = Instant::now() + Duration::from_secs(5);
    while COUNTS.iter().any(|c| c.load(Ordering::SeqCst) < N as u32) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    for i in 0..N {
        assert_eq!(COUNTS[i].load(Ordering::SeqCst), N as u32, "silk {i} message count");
        assert_eq!(
            FIRST_ORIGIN[i].load(Ordering::SeqCst),
            ((i + N - 1) % N) as u32,
            "silk {i} first-arrival origin"
        );
    }

    for r in &refs {
        engine.kill(*r).unwrap();
    }
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(engine.free_count(), N as u32);

    engine.join().unwrap();
}
